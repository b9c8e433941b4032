// THEORY:
// `Image` is the display-ready pixel buffer that the ablation pipeline mutates and
// persists. It is laid out channel-first (C x H x W) to match the batch tensors
// coming out of the dataset, so slicing an image out of a batch is a plain copy
// with no transposition.

use ndarray::{Array3, ArrayView3};

pub const RGB_CHANNELS: usize = 3;

/// A channel-first image with real-valued intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array3<f32>,
}

impl Image {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn get(&self, channel: usize, row: usize, col: usize) -> f32 {
        self.data[[channel, row, col]]
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }

    /// Arithmetic mean of each channel over the whole image.
    pub fn channel_means(&self) -> Vec<f32> {
        self.data
            .outer_iter()
            .map(|plane| plane.mean().unwrap_or(0.0))
            .collect()
    }
}
