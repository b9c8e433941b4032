// THEORY:
// This file is the main entry point for the `pixel_ablation` library crate.
// It exposes the `PerturbationPipeline` (and its parallel twin) together with the
// small set of types a caller needs to drive an ablation run: configuration,
// removal levels, and the collaborator traits for saliency, normalization and
// image persistence.
//
// The leaf algorithms (`ranking`, `selection`, `replacement`) live in `core_modules`
// and are public so evaluation code can reuse them on single images.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::PerturbationConfig;
pub use core_modules::dataset::{FolderDataset, ImageBatch};
pub use core_modules::image_tensor::Image;
pub use core_modules::importance_map::{Coordinate, ImportanceMap};
pub use core_modules::normalization::{ChannelNormalization, IMAGENET, Normalization};
pub use core_modules::removal_level::{FillRule, Protocol, RemovalLevel};
pub use core_modules::saliency::{GradientSaliency, SaliencyOutput, SaliencyProducer};
pub use core_modules::utils::image_helper::image_helper::{FileSink, ImageSink};
pub use error::{AblationError, Result};
pub use parallel_pipeline::ParallelPerturbationPipeline;
pub use pipeline::{OutputRecord, PerturbationPipeline, RunReport};
