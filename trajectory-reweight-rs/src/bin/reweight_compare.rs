//! CLI entry point: standard vs. trajectory-reweighted training on noisy labels.

use std::path::PathBuf;

use candle_core::Device;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trajectory_reweight_rs::{run_comparison, ExperimentConfig, Result};

#[derive(Parser)]
#[command(name = "reweight-compare")]
#[command(about = "Compare standard and trajectory-reweighted training on noisy labels")]
#[command(version)]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input batch size for training
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of epochs to train
    #[arg(long)]
    epochs: Option<usize>,

    /// Epochs before trajectory tracking starts
    #[arg(long)]
    burn_in: Option<usize>,

    /// Training examples held out for validation
    #[arg(long)]
    valid_size: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Fraction of training labels flipped to a wrong class
    #[arg(long)]
    noise_level: Option<f32>,

    /// Number of trajectory clusters
    #[arg(long)]
    num_cluster: Option<usize>,

    /// Outlier suppression factor
    #[arg(long)]
    scale: Option<f32>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Batches between training log lines
    #[arg(long)]
    log_interval: Option<usize>,

    /// JSON-lines file the run report is appended to
    #[arg(long, default_value = "reweight_comparison.data")]
    output: PathBuf,

    /// Run on CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

impl Args {
    fn experiment_config(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)?,
            None => ExperimentConfig::default(),
        };
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.burn_in {
            config.reweight.burn_in = v;
        }
        if let Some(v) = self.valid_size {
            config.valid_size = v;
        }
        if let Some(v) = self.lr {
            config.lr = v;
        }
        if let Some(v) = self.noise_level {
            config.noise_level = v;
        }
        if let Some(v) = self.num_cluster {
            config.reweight.num_cluster = v;
        }
        if let Some(v) = self.scale {
            config.reweight.scale = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
            config.reweight.seed = v;
        }
        if let Some(v) = self.log_interval {
            config.log_interval = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.experiment_config()?;
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    tracing::info!(?device, epochs = config.epochs, "starting comparison");

    let report = run_comparison(&config, &device)?;
    report.append_jsonl(&args.output)?;

    if let (Some(standard), Some(reweight)) = (report.standard.last(), report.reweight.last()) {
        tracing::info!(
            "final test accuracy: standard {:.2}%, reweight {:.2}%",
            standard.test.accuracy,
            reweight.test.accuracy
        );
    }
    tracing::info!(output = %args.output.display(), "appended run report");
    Ok(())
}
