// Command-line runner: perturbs a class-per-folder dataset using the built-in
// gradient saliency baseline and writes the images under the output root.

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use env_logger::{Builder, Env};
use log::{error, info};
use pixel_ablation::{
    FileSink, FillRule, FolderDataset, GradientSaliency, IMAGENET, ParallelPerturbationPipeline,
    PerturbationConfig, PerturbationPipeline, Protocol, RunReport,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pixel_ablation")]
#[command(about = "Remove pixels ranked by a saliency map and save the perturbed images")]
struct Cli {
    /// Dataset root with one sub-folder per class
    #[arg(long)]
    dataset: PathBuf,

    /// Output root for perturbed images
    #[arg(long)]
    output: PathBuf,

    /// TOML file with run settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// roar (remove most important) or pp (keep most important)
    #[arg(long)]
    protocol: Option<Protocol>,

    /// Comma-separated removal fractions in (0, 1]
    #[arg(long, value_delimiter = ',')]
    fractions: Option<Vec<f64>>,

    /// zero or mean
    #[arg(long)]
    fill: Option<FillRule>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Images are resized to SIZE x SIZE before saliency
    #[arg(long)]
    image_size: Option<u32>,

    /// Process the images of each batch on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Worker count for --parallel (defaults to the number of CPUs)
    #[arg(long, requires = "parallel")]
    workers: Option<usize>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

impl Cli {
    fn resolve_config(&self) -> Result<PerturbationConfig> {
        let mut config = match &self.config {
            Some(path) => PerturbationConfig::from_toml_file(path)?,
            None => PerturbationConfig::default(),
        };
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(fractions) = &self.fractions {
            config.fractions = fractions.clone();
        }
        if let Some(fill) = self.fill {
            config.fill_rule = fill;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbosity: &Verbosity<InfoLevel>) {
    // Honor RUST_LOG when no -v/-q flag was given.
    let use_env = !verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();
    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(verbosity.log_level_filter());
        b
    };
    logger.format_timestamp(None).init();
}

fn run(cli: &Cli) -> Result<RunReport> {
    let config = cli.resolve_config()?;
    let normalization = Arc::new(IMAGENET);
    let dataset = FolderDataset::open(
        &cli.dataset,
        config.image_size,
        config.batch_size,
        normalization.clone(),
    )?;
    info!(
        "🔍 {} image(s) in {} class(es) from {}",
        dataset.len(),
        dataset.classes().len(),
        cli.dataset.display()
    );

    let report = if cli.parallel {
        let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
        runtime.block_on(async {
            let mut pipeline = ParallelPerturbationPipeline::new(
                config,
                &cli.output,
                GradientSaliency,
                normalization,
                Arc::new(FileSink),
                cli.workers,
            )?;
            pipeline.run(dataset).await
        })?
    } else {
        let mut pipeline = PerturbationPipeline::new(
            config,
            &cli.output,
            GradientSaliency,
            normalization,
            Arc::new(FileSink),
        )?;
        pipeline.run(dataset)?
    };
    Ok(report)
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);

    match run(&cli) {
        Ok(report) => {
            println!(
                "Perturbed images saved: {} from {} batch(es) in {:.2}s",
                report.images_written, report.batches_processed, report.elapsed_secs
            );
        }
        Err(e) => {
            error!("❌ {e:#}");
            std::process::exit(1);
        }
    }
}
