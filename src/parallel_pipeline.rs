// THEORY:
// `ParallelPerturbationPipeline` produces exactly the same files as
// `PerturbationPipeline`, but spreads the (level, image) jobs of each batch over a
// pool of tokio workers. Batches are still consumed in order and the saliency
// producer is still called once per batch on the calling task.
//
// Determinism does not depend on which worker finishes first: every job receives
// its image index before dispatch, computed from its position
// (batch start + level * batch length + image offset). Results are collected in
// submission order, so the run report matches the sequential one record for record.

use crate::config::PerturbationConfig;
use crate::core_modules::dataset::ImageBatch;
use crate::core_modules::normalization::Normalization;
use crate::core_modules::output_layout::OutputLayout;
use crate::core_modules::removal_level::{FillRule, RemovalLevel};
use crate::core_modules::saliency::SaliencyProducer;
use crate::core_modules::utils::image_helper::image_helper::ImageSink;
use crate::error::{AblationError, Result};
use crate::pipeline::{
    OutputRecord, PreparedBatch, RunReport, perturb, persist, prepare_batch, write_manifest,
};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Everything a worker needs that does not change between jobs.
struct WorkerContext {
    layout: OutputLayout,
    sink: Arc<dyn ImageSink>,
    fill_rule: FillRule,
}

struct PerturbJob {
    batch: Arc<PreparedBatch>,
    image_slot: usize,
    level: RemovalLevel,
    image_index: u64,
}

struct PerturbTask {
    job: PerturbJob,
    result_sender: oneshot::Sender<Result<OutputRecord>>,
}

pub(crate) struct WorkerPool {
    task_sender: mpsc::UnboundedSender<PerturbTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(worker_count: usize, context: Arc<WorkerContext>) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<PerturbTask>();
        let mut workers = Vec::with_capacity(worker_count);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<PerturbTask>())
            .unzip();

        // Round-robin dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        for mut worker_receiver in worker_receivers {
            let context = context.clone();
            let worker = tokio::spawn(async move {
                while let Some(PerturbTask { job, result_sender }) = worker_receiver.recv().await {
                    let context = context.clone();
                    let outcome = tokio::task::spawn_blocking(move || Self::run_job(&context, job))
                        .await
                        .unwrap_or_else(|e| Err(AblationError::WorkerPool(e.to_string())));
                    let _ = result_sender.send(outcome);
                }
            });
            workers.push(worker);
        }

        Self {
            task_sender,
            workers,
        }
    }

    fn run_job(context: &WorkerContext, job: PerturbJob) -> Result<OutputRecord> {
        let batch = &job.batch;
        let image = perturb(
            &batch.display_images[job.image_slot],
            &batch.rankings[job.image_slot],
            &job.level,
            context.fill_rule,
        )?;
        let relative = context.layout.relative_path(job.image_index, &job.level);
        persist(
            context.sink.as_ref(),
            &image,
            &context.layout.absolute_path(&relative),
        )?;

        Ok(OutputRecord {
            image_index: job.image_index,
            protocol: job.level.protocol(),
            fraction: job.level.fraction(),
            removal_percentage: job.level.percentage_label(),
            path: relative,
            label: batch.labels[job.image_slot],
            model_output: batch.model_outputs[job.image_slot].clone(),
        })
    }

    fn submit(&self, job: PerturbJob) -> Result<oneshot::Receiver<Result<OutputRecord>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(PerturbTask { job, result_sender })
            .map_err(|_| AblationError::WorkerPool("failed to send job to worker pool".into()))?;
        Ok(result_receiver)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

pub struct ParallelPerturbationPipeline<P: SaliencyProducer> {
    config: PerturbationConfig,
    levels: Vec<RemovalLevel>,
    layout: OutputLayout,
    producer: P,
    normalization: Arc<dyn Normalization>,
    worker_pool: WorkerPool,
    next_image_index: u64,
}

impl<P: SaliencyProducer> ParallelPerturbationPipeline<P> {
    /// Must be called from within a tokio runtime. `workers` defaults to the
    /// number of logical CPUs.
    pub fn new(
        config: PerturbationConfig,
        output_root: impl Into<PathBuf>,
        producer: P,
        normalization: Arc<dyn Normalization>,
        sink: Arc<dyn ImageSink>,
        workers: Option<usize>,
    ) -> Result<Self> {
        let levels = config.levels()?;
        let layout = OutputLayout::new(output_root, config.extension.clone());
        let context = Arc::new(WorkerContext {
            layout: layout.clone(),
            sink,
            fill_rule: config.fill_rule,
        });
        let worker_pool = WorkerPool::new(workers.unwrap_or_else(num_cpus::get), context);

        Ok(Self {
            config,
            levels,
            layout,
            producer,
            normalization,
            worker_pool,
            next_image_index: 0,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    pub fn next_image_index(&self) -> u64 {
        self.next_image_index
    }

    pub async fn run<I>(&mut self, dataset: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = anyhow::Result<ImageBatch>>,
    {
        let start = Instant::now();
        info!(
            "🎯 Parallel perturbation run ({} workers): {} | levels: {:?} | fill: {}",
            self.worker_count(),
            self.config.protocol,
            self.config.fractions,
            self.config.fill_rule
        );

        self.layout.prepare(&self.levels)?;

        let mut report = RunReport::default();
        for (batch_index, batch) in dataset.into_iter().enumerate() {
            let batch =
                batch.map_err(|source| AblationError::Upstream { batch_index, source })?;
            let records = self.process_batch(batch_index, &batch).await?;
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

    pub async fn process_batch(
        &mut self,
        batch_index: usize,
        batch: &ImageBatch,
    ) -> Result<Vec<OutputRecord>> {
        let prepared = Arc::new(prepare_batch(
            &mut self.producer,
            self.normalization.as_ref(),
            batch_index,
            batch,
        )?);
        let batch_len = prepared.len();
        let batch_start = self.next_image_index;

        let mut receivers = Vec::with_capacity(batch_len * self.levels.len());
        for (level_offset, level) in self.levels.iter().enumerate() {
            for image_slot in 0..batch_len {
                let image_index = batch_start + (level_offset * batch_len + image_slot) as u64;
                receivers.push(self.worker_pool.submit(PerturbJob {
                    batch: prepared.clone(),
                    image_slot,
                    level: *level,
                    image_index,
                })?);
            }
        }
        self.next_image_index = batch_start + receivers.len() as u64;
        debug!(
            "batch {batch_index}: dispatched {} job(s) starting at index {batch_start}",
            receivers.len()
        );

        let outcomes = futures::future::try_join_all(receivers)
            .await
            .map_err(|_| AblationError::WorkerPool("worker dropped its result".into()))?;
        outcomes.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::image_tensor::Image;
    use crate::core_modules::importance_map::ImportanceMap;
    use crate::core_modules::normalization::IMAGENET;
    use crate::core_modules::saliency::SaliencyOutput;
    use ndarray::Array4;
    use std::path::Path;

    struct NullSink;

    impl ImageSink for NullSink {
        fn write(&self, _image: &Image, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct ConstantSaliency;

    impl SaliencyProducer for ConstantSaliency {
        fn compute(&mut self, batch: &ImageBatch) -> anyhow::Result<SaliencyOutput> {
            let (h, w) = batch.spatial_dims();
            Ok(SaliencyOutput {
                maps: vec![ImportanceMap::from_shape_vec(h, w, vec![1.0; h * w])?; batch.len()],
                model_outputs: vec![Vec::new(); batch.len()],
            })
        }
    }

    #[tokio::test]
    async fn indices_follow_submission_order() {
        let root = tempfile::tempdir().unwrap();
        let config = PerturbationConfig {
            fractions: vec![0.1, 0.9],
            write_manifest: false,
            ..Default::default()
        };
        let mut pipeline = ParallelPerturbationPipeline::new(
            config,
            root.path(),
            ConstantSaliency,
            Arc::new(IMAGENET),
            Arc::new(NullSink),
            Some(3),
        )
        .unwrap();
        assert_eq!(pipeline.worker_count(), 3);

        let batches = vec![
            Ok(ImageBatch::new(Array4::zeros((3, 3, 5, 5)), vec![0, 1, 2])),
            Ok(ImageBatch::new(Array4::zeros((1, 3, 5, 5)), vec![3])),
        ];
        let report = pipeline.run(batches).await.unwrap();

        let indices: Vec<u64> = report.records.iter().map(|r| r.image_index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        let labels: Vec<usize> = report.records.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![0, 1, 2, 0, 1, 2, 3, 3]);
        assert_eq!(pipeline.next_image_index(), 8);
    }
}
