// THEORY:
// The saliency producer is the external collaborator whose maps are being evaluated.
// The pipeline only needs one thing from it: given a batch, return one importance
// map per image with the same spatial size, plus whatever raw model output the
// producer computed along the way (kept for later comparison against predictions
// on the perturbed images).
//
// `GradientSaliency` is a model-free baseline: the Sobel gradient magnitude of each
// image's channel-averaged intensity. It makes the runner usable without a
// classifier and gives a reference curve that any real attribution method should beat.

use crate::core_modules::dataset::ImageBatch;
use crate::core_modules::importance_map::ImportanceMap;
use anyhow::Result;
use ndarray::{Array2, ArrayView2, Axis};

/// Maps and raw model outputs for one batch, in batch order.
#[derive(Debug, Clone, Default)]
pub struct SaliencyOutput {
    pub maps: Vec<ImportanceMap>,
    pub model_outputs: Vec<Vec<f32>>,
}

/// Produces per-image importance maps for a batch of normalized images.
pub trait SaliencyProducer {
    fn compute(&mut self, batch: &ImageBatch) -> Result<SaliencyOutput>;
}

/// Sobel gradient magnitude baseline. Reports no model output.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientSaliency;

impl GradientSaliency {
    fn gradient_magnitude(intensity: ArrayView2<'_, f32>) -> Array2<f32> {
        let (height, width) = intensity.dim();
        let at = |y: isize, x: isize| -> f32 {
            let y = y.clamp(0, height as isize - 1) as usize;
            let x = x.clamp(0, width as isize - 1) as usize;
            intensity[[y, x]]
        };

        Array2::from_shape_fn((height, width), |(y, x)| {
            let (y, x) = (y as isize, x as isize);
            let gx = (at(y - 1, x + 1) + 2.0 * at(y, x + 1) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y, x - 1) + at(y + 1, x - 1));
            let gy = (at(y + 1, x - 1) + 2.0 * at(y + 1, x) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y - 1, x) + at(y - 1, x + 1));
            (gx * gx + gy * gy).sqrt()
        })
    }
}

impl SaliencyProducer for GradientSaliency {
    fn compute(&mut self, batch: &ImageBatch) -> Result<SaliencyOutput> {
        let mut maps = Vec::with_capacity(batch.len());
        for image in batch.images.outer_iter() {
            let intensity = image
                .mean_axis(Axis(0))
                .ok_or_else(|| anyhow::anyhow!("image without channels"))?;
            maps.push(ImportanceMap::new(Self::gradient_magnitude(intensity.view()))?);
        }
        Ok(SaliencyOutput {
            model_outputs: vec![Vec::new(); maps.len()],
            maps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::importance_map::Coordinate;
    use crate::core_modules::ranking::rank;
    use ndarray::Array4;

    #[test]
    fn highlights_edges_over_flat_regions() {
        // Left half dark, right half bright.
        let images = Array4::from_shape_fn((1, 3, 6, 6), |(_, _, _, x)| if x < 3 { 0.0 } else { 1.0 });
        let batch = ImageBatch::new(images, vec![0]);

        let output = GradientSaliency.compute(&batch).unwrap();
        assert_eq!(output.maps.len(), 1);
        assert_eq!(output.model_outputs, vec![Vec::<f32>::new()]);

        let map = &output.maps[0];
        assert_eq!((map.height(), map.width()), (6, 6));
        assert_eq!(map.score(Coordinate::new(2, 0)), 0.0);
        assert!(map.score(Coordinate::new(2, 2)) > 0.0);

        let top = rank(map)[0];
        assert!(top.col == 2 || top.col == 3);
    }
}
