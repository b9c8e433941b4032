pub mod dataset;
pub mod image_tensor;
pub mod importance_map;
pub mod normalization;
pub mod output_layout;
pub mod ranking;
pub mod removal_level;
pub mod replacement;
pub mod saliency;
pub mod selection;
pub mod utils;
