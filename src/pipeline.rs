// THEORY:
// The `pipeline` module is the top-level API of the ablation engine. It ties the
// leaf modules together into one pass over a dataset:
//
//   batch -> saliency producer -> rank (once per image)
//         -> for each removal level: select -> replace -> persist
//
// Key architectural principles:
// 1.  **Owned State**: The image counter, the collaborators and the validated
//     removal levels all live in `PerturbationPipeline`. Nothing is global; two
//     pipelines never share a counter.
// 2.  **Deterministic Naming**: The counter advances once per written image, level
//     by level and image by image, and is never reset between batches. The same
//     dataset and configuration always produce the same file names.
// 3.  **Batch Atomicity Up Front**: Everything that can fail for a whole batch
//     (producer, map validation, ranking) happens before its first image is
//     written. A failing batch writes nothing.
// 4.  **Fail Loudly**: Contract violations, upstream failures and write failures all
//     end the run with an error. Files already written stay on disk.

use crate::config::PerturbationConfig;
use crate::core_modules::dataset::ImageBatch;
use crate::core_modules::image_tensor::Image;
use crate::core_modules::importance_map::Coordinate;
use crate::core_modules::normalization::Normalization;
use crate::core_modules::output_layout::OutputLayout;
use crate::core_modules::ranking::rank;
use crate::core_modules::removal_level::{FillRule, RemovalLevel};
use crate::core_modules::replacement::replace;
use crate::core_modules::saliency::SaliencyProducer;
use crate::core_modules::selection::select;
use crate::core_modules::utils::image_helper::image_helper::ImageSink;
use crate::error::{AblationError, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

// Re-export key data structures for the public API.
pub use crate::core_modules::removal_level::Protocol;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One persisted perturbed image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub image_index: u64,
    pub protocol: Protocol,
    pub fraction: f64,
    /// Percentage as it appears in the path, e.g. "10.0".
    pub removal_percentage: String,
    /// Path relative to the output root.
    pub path: PathBuf,
    /// Dataset label of the source image.
    pub label: usize,
    /// Raw model output reported by the saliency producer for the source image.
    pub model_output: Vec<f32>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub batches_processed: usize,
    pub images_written: usize,
    pub elapsed_secs: f64,
    pub records: Vec<OutputRecord>,
}

/// A batch whose saliency has been computed and ranked, ready to perturb.
pub(crate) struct PreparedBatch {
    pub display_images: Vec<Image>,
    pub rankings: Vec<Vec<Coordinate>>,
    pub labels: Vec<usize>,
    pub model_outputs: Vec<Vec<f32>>,
}

impl PreparedBatch {
    pub fn len(&self) -> usize {
        self.display_images.len()
    }
}

/// Runs the producer on a batch, checks its output and ranks every map.
pub(crate) fn prepare_batch<P: SaliencyProducer + ?Sized>(
    producer: &mut P,
    normalization: &dyn Normalization,
    batch_index: usize,
    batch: &ImageBatch,
) -> Result<PreparedBatch> {
    let output = producer
        .compute(batch)
        .map_err(|source| AblationError::Upstream {
            batch_index,
            source,
        })?;

    let batch_len = batch.len();
    if batch.labels.len() != batch_len {
        return Err(AblationError::BatchMismatch {
            batch_index,
            reason: format!("{} labels for {batch_len} images", batch.labels.len()),
        });
    }
    if output.maps.len() != batch_len || output.model_outputs.len() != batch_len {
        return Err(AblationError::BatchMismatch {
            batch_index,
            reason: format!(
                "producer returned {} maps and {} outputs for {batch_len} images",
                output.maps.len(),
                output.model_outputs.len()
            ),
        });
    }
    let (height, width) = batch.spatial_dims();
    if let Some(map) = output
        .maps
        .iter()
        .find(|m| (m.height(), m.width()) != (height, width))
    {
        return Err(AblationError::BatchMismatch {
            batch_index,
            reason: format!(
                "importance map is {}x{}, images are {height}x{width}",
                map.height(),
                map.width()
            ),
        });
    }

    Ok(PreparedBatch {
        display_images: (0..batch_len)
            .map(|i| normalization.denormalize(&batch.image(i)))
            .collect(),
        rankings: output.maps.iter().map(rank).collect(),
        labels: batch.labels.clone(),
        model_outputs: output.model_outputs,
    })
}

/// Produces one perturbed copy of a display-ready image.
pub(crate) fn perturb(
    display_image: &Image,
    ranking: &[Coordinate],
    level: &RemovalLevel,
    fill_rule: FillRule,
) -> Result<Image> {
    let count = level.target_count(ranking.len());
    let selection = select(ranking, level.protocol(), count)?;
    let mut image = display_image.clone();
    replace(&mut image, &selection, fill_rule)?;
    Ok(image)
}

/// Writes an image under the layout, mapping failures to `Persistence`.
pub(crate) fn persist(sink: &dyn ImageSink, image: &Image, path: &Path) -> Result<()> {
    sink.write(image, path)
        .map_err(|source| AblationError::Persistence {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn write_manifest(root: &Path, report: &RunReport) -> Result<()> {
    let path = root.join(MANIFEST_FILE_NAME);
    let to_persistence = |source: anyhow::Error| AblationError::Persistence {
        path: path.clone(),
        source,
    };
    let file = std::fs::File::create(&path).map_err(|e| to_persistence(e.into()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)
        .map_err(|e| to_persistence(e.into()))?;
    debug!("📋 Saved manifest to: {}", path.display());
    Ok(())
}

/// The main, top-level struct for the ablation engine.
pub struct PerturbationPipeline<P: SaliencyProducer> {
    config: PerturbationConfig,
    levels: Vec<RemovalLevel>,
    layout: OutputLayout,
    producer: P,
    normalization: Arc<dyn Normalization>,
    sink: Arc<dyn ImageSink>,
    next_image_index: u64,
}

impl<P: SaliencyProducer> PerturbationPipeline<P> {
    pub fn new(
        config: PerturbationConfig,
        output_root: impl Into<PathBuf>,
        producer: P,
        normalization: Arc<dyn Normalization>,
        sink: Arc<dyn ImageSink>,
    ) -> Result<Self> {
        let levels = config.levels()?;
        let layout = OutputLayout::new(output_root, config.extension.clone());
        Ok(Self {
            config,
            levels,
            layout,
            producer,
            normalization,
            sink,
            next_image_index: 0,
        })
    }

    pub fn levels(&self) -> &[RemovalLevel] {
        &self.levels
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Index the next written image will receive.
    pub fn next_image_index(&self) -> u64 {
        self.next_image_index
    }

    /// Processes every batch of `dataset` in order.
    pub fn run<I>(&mut self, dataset: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = anyhow::Result<ImageBatch>>,
    {
        let start = Instant::now();
        info!(
            "🎯 Perturbation run: {} | levels: {:?} | fill: {} | output: {}",
            self.config.protocol,
            self.config.fractions,
            self.config.fill_rule,
            self.layout.root().display()
        );

        // Stage 0: Destination setup, once per run
        self.layout.prepare(&self.levels)?;

        let mut report = RunReport::default();
        for (batch_index, batch) in dataset.into_iter().enumerate() {
            let batch =
                batch.map_err(|source| AblationError::Upstream { batch_index, source })?;
            let records = self.process_batch(batch_index, &batch)?;
            report.images_written += records.len();
            report.records.extend(records);
            report.batches_processed += 1;
        }

        if report.batches_processed == 0 {
            warn!("No batches to process");
        }

        report.elapsed_secs = start.elapsed().as_secs_f64();
        if self.config.write_manifest {
            write_manifest(self.layout.root(), &report)?;
        }
        info!(
            "✅ Wrote {} image(s) from {} batch(es) in {:.2}s",
            report.images_written, report.batches_processed, report.elapsed_secs
        );
        Ok(report)
    }

    /// Perturbs and persists one batch at every configured level.
    pub fn process_batch(
        &mut self,
        batch_index: usize,
        batch: &ImageBatch,
    ) -> Result<Vec<OutputRecord>> {
        // Stage 1: Saliency, validation and ranking
        let prepared = prepare_batch(
            &mut self.producer,
            self.normalization.as_ref(),
            batch_index,
            batch,
        )?;
        debug!("batch {batch_index}: {} image(s) ranked", prepared.len());

        // Stage 2: Select, replace and persist, level by level
        let mut records = Vec::with_capacity(prepared.len() * self.levels.len());
        for level in &self.levels {
            for i in 0..prepared.len() {
                let image = perturb(
                    &prepared.display_images[i],
                    &prepared.rankings[i],
                    level,
                    self.config.fill_rule,
                )?;

                let image_index = self.next_image_index;
                let relative = self.layout.relative_path(image_index, level);
                persist(
                    self.sink.as_ref(),
                    &image,
                    &self.layout.absolute_path(&relative),
                )?;
                self.next_image_index += 1;

                records.push(OutputRecord {
                    image_index,
                    protocol: level.protocol(),
                    fraction: level.fraction(),
                    removal_percentage: level.percentage_label(),
                    path: relative,
                    label: prepared.labels[i],
                    model_output: prepared.model_outputs[i].clone(),
                });
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::importance_map::ImportanceMap;
    use crate::core_modules::normalization::ChannelNormalization;
    use crate::core_modules::saliency::SaliencyOutput;
    use ndarray::Array4;
    use std::sync::Mutex;

    /// Identity normalization so display values equal batch values.
    fn identity() -> Arc<dyn Normalization> {
        Arc::new(ChannelNormalization {
            mean: [0.0; 3],
            std: [1.0; 3],
        })
    }

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<(PathBuf, Image)>>,
    }

    impl ImageSink for RecordingSink {
        fn write(&self, image: &Image, path: &Path) -> anyhow::Result<()> {
            self.written
                .lock()
                .unwrap()
                .push((path.to_path_buf(), image.clone()));
            Ok(())
        }
    }

    /// Scores each pixel by its row-major offset, plus the image's batch position.
    struct OffsetSaliency;

    impl SaliencyProducer for OffsetSaliency {
        fn compute(&mut self, batch: &ImageBatch) -> anyhow::Result<SaliencyOutput> {
            let (height, width) = batch.spatial_dims();
            let maps = (0..batch.len())
                .map(|_| {
                    ImportanceMap::from_shape_vec(
                        height,
                        width,
                        (0..height * width).map(|i| i as f32).collect(),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            let model_outputs = (0..batch.len()).map(|i| vec![i as f32]).collect();
            Ok(SaliencyOutput {
                maps,
                model_outputs,
            })
        }
    }

    fn batch(len: usize) -> ImageBatch {
        ImageBatch::new(Array4::from_elem((len, 3, 4, 4), 0.5), vec![7; len])
    }

    #[test]
    fn counter_runs_across_levels_and_batches() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let config = PerturbationConfig {
            fractions: vec![0.25, 0.5],
            write_manifest: false,
            ..Default::default()
        };
        let mut pipeline =
            PerturbationPipeline::new(config, root.path(), OffsetSaliency, identity(), sink.clone())
                .unwrap();

        let report = pipeline
            .run(vec![Ok(batch(2)), Ok(batch(1))])
            .unwrap();

        assert_eq!(report.batches_processed, 2);
        assert_eq!(report.images_written, 6);
        assert_eq!(pipeline.next_image_index(), 6);

        let names: Vec<String> = report
            .records
            .iter()
            .map(|r| r.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "roar/removal25.0%/img_id=0removal=25.0%.jpeg",
                "roar/removal25.0%/img_id=1removal=25.0%.jpeg",
                "roar/removal50.0%/img_id=2removal=50.0%.jpeg",
                "roar/removal50.0%/img_id=3removal=50.0%.jpeg",
                "roar/removal25.0%/img_id=4removal=25.0%.jpeg",
                "roar/removal50.0%/img_id=5removal=50.0%.jpeg",
            ]
        );
        assert_eq!(report.records[1].model_output, vec![1.0]);
        assert_eq!(report.records[4].label, 7);

        // 25% of 16 pixels: the last four row-major offsets score highest.
        let written = sink.written.lock().unwrap();
        let first = &written[0].1;
        for offset in 0..16 {
            let (y, x) = (offset / 4, offset % 4);
            let expected = if offset >= 12 { 0.0 } else { 0.5 };
            assert_eq!(first.get(0, y, x), expected);
        }
    }

    struct FailingSaliency;

    impl SaliencyProducer for FailingSaliency {
        fn compute(&mut self, _batch: &ImageBatch) -> anyhow::Result<SaliencyOutput> {
            anyhow::bail!("gradient hook missing")
        }
    }

    #[test]
    fn producer_failure_writes_nothing_for_the_batch() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline = PerturbationPipeline::new(
            PerturbationConfig::default(),
            root.path(),
            FailingSaliency,
            identity(),
            sink.clone(),
        )
        .unwrap();

        let err = pipeline.run(vec![Ok(batch(2))]).unwrap_err();
        assert!(matches!(err, AblationError::Upstream { batch_index: 0, .. }));
        assert!(sink.written.lock().unwrap().is_empty());
        assert!(!root.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn dataset_failure_is_reported_with_its_batch_index() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline = PerturbationPipeline::new(
            PerturbationConfig::default(),
            root.path(),
            OffsetSaliency,
            identity(),
            sink.clone(),
        )
        .unwrap();

        let err = pipeline
            .run(vec![Ok(batch(1)), Err(anyhow::anyhow!("corrupt file"))])
            .unwrap_err();
        assert!(matches!(err, AblationError::Upstream { batch_index: 1, .. }));
        assert_eq!(sink.written.lock().unwrap().len(), 1);
    }

    struct WrongSizeSaliency;

    impl SaliencyProducer for WrongSizeSaliency {
        fn compute(&mut self, batch: &ImageBatch) -> anyhow::Result<SaliencyOutput> {
            Ok(SaliencyOutput {
                maps: vec![ImportanceMap::from_shape_vec(2, 2, vec![0.0; 4])?; batch.len()],
                model_outputs: vec![Vec::new(); batch.len()],
            })
        }
    }

    #[test]
    fn mismatched_map_size_is_a_contract_violation() {
        let root = tempfile::tempdir().unwrap();
        let mut pipeline = PerturbationPipeline::new(
            PerturbationConfig::default(),
            root.path(),
            WrongSizeSaliency,
            identity(),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();

        let err = pipeline.run(vec![Ok(batch(1))]).unwrap_err();
        assert!(matches!(err, AblationError::BatchMismatch { batch_index: 0, .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn invalid_configuration_is_rejected_at_construction() {
        let config = PerturbationConfig {
            fractions: vec![0.0],
            ..Default::default()
        };
        let result = PerturbationPipeline::new(
            config,
            "unused",
            OffsetSaliency,
            identity(),
            Arc::new(RecordingSink::default()),
        );
        assert!(matches!(result, Err(AblationError::InvalidFraction(_))));
    }

    struct FullDiskSink;

    impl ImageSink for FullDiskSink {
        fn write(&self, _image: &Image, _path: &Path) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn sink_failure_stops_the_run() {
        let root = tempfile::tempdir().unwrap();
        let mut pipeline = PerturbationPipeline::new(
            PerturbationConfig::default(),
            root.path(),
            OffsetSaliency,
            identity(),
            Arc::new(FullDiskSink),
        )
        .unwrap();

        let err = pipeline.run(vec![Ok(batch(2))]).unwrap_err();
        match &err {
            AblationError::Persistence { path, .. } => {
                assert!(path.ends_with("roar/removal10.0%/img_id=0removal=10.0%.jpeg"))
            }
            other => panic!("expected a persistence error, got {other:?}"),
        }
        assert!(!err.is_contract_violation());
        assert_eq!(pipeline.next_image_index(), 0);
        assert!(!root.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn unusable_output_root_fails_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("taken");
        std::fs::write(&root, "a file, not a directory").unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline = PerturbationPipeline::new(
            PerturbationConfig::default(),
            &root,
            OffsetSaliency,
            identity(),
            sink.clone(),
        )
        .unwrap();

        let err = pipeline.run(vec![Ok(batch(1))]).unwrap_err();
        assert!(matches!(err, AblationError::Persistence { .. }));
        assert!(!err.is_contract_violation());
        assert!(sink.written.lock().unwrap().is_empty());
        assert_eq!(pipeline.next_image_index(), 0);
    }
}
