// THEORY:
// Images travel through the pipeline normalized for the model. Pixels are
// replaced and written in display range, so every batch is denormalized once
// before perturbation.

use crate::core_modules::image_tensor::Image;
use ndarray::{ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};

/// Converts images between the model's expected input statistics and a
/// display-ready range.
pub trait Normalization: Send + Sync {
    fn normalize(&self, image: &mut Image);
    /// Returns a display-ready copy; the normalized input is left untouched.
    fn denormalize(&self, normalized: &Image) -> Image;
}

/// `(x - mean) / std` per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelNormalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// ImageNet statistics used by torchvision-pretrained classifiers.
pub const IMAGENET: ChannelNormalization = ChannelNormalization {
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
};

impl Default for ChannelNormalization {
    fn default() -> Self {
        IMAGENET
    }
}

impl ChannelNormalization {
    fn apply(&self, mut data: ArrayViewMut3<'_, f32>, inverse: bool) {
        for (channel, mut plane) in data.axis_iter_mut(Axis(0)).enumerate() {
            let (mean, std) = (self.mean[channel % 3], self.std[channel % 3]);
            if inverse {
                plane.mapv_inplace(|v| v * std + mean);
            } else {
                plane.mapv_inplace(|v| (v - mean) / std);
            }
        }
    }
}

impl Normalization for ChannelNormalization {
    fn normalize(&self, image: &mut Image) {
        self.apply(image.data_mut().view_mut(), false);
    }

    fn denormalize(&self, normalized: &Image) -> Image {
        let mut display = normalized.clone();
        self.apply(display.data_mut().view_mut(), true);
        display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn denormalize_inverts_normalize() {
        let original = Image::new(Array3::from_shape_fn((3, 4, 4), |(c, y, x)| {
            (c as f32 * 0.3 + y as f32 * 0.05 + x as f32 * 0.01).min(1.0)
        }));
        let mut normalized = original.clone();
        IMAGENET.normalize(&mut normalized);
        assert!((normalized.get(0, 0, 0) - (0.0 - 0.485) / 0.229).abs() < 1e-6);

        let restored = IMAGENET.denormalize(&normalized);
        for (a, b) in restored.view().iter().zip(original.view().iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
