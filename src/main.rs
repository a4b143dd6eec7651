//! ANODE training CLI
//!
//! Trains an ODE ResNet or ODE SqueezeNext on CIFAR-10, GalaxyZoo or MTVSO,
//! checkpointing every epoch, and prints the best test accuracy at the end.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use anode_train::backend::{backend_name, default_device, TrainingBackend};
use anode_train::dataset::DatasetKind;
use anode_train::model::{IntegrationMethod, Network};
use anode_train::utils::logging::{init_logging, LogConfig};
use anode_train::{training, RunConfig};

/// Train image classifiers with ODE blocks
#[derive(Parser, Debug)]
#[command(name = "anode-train")]
#[command(version)]
#[command(about = "ANODE training with fixed-step ODE blocks", long_about = None)]
struct Cli {
    /// Backbone network
    #[arg(long, value_enum, default_value = "sqnxt")]
    network: Network,

    /// Integration method of the ODE blocks
    #[arg(long, value_enum, default_value = "Euler")]
    method: IntegrationMethod,

    /// Number of training epochs
    #[arg(long = "num_epochs", default_value = "50")]
    num_epochs: usize,

    /// Base learning rate
    #[arg(long, default_value = "0.1")]
    lr: f64,

    /// Integration steps per ODE block
    #[arg(long = "Nt", default_value = "2")]
    nt: usize,

    /// Training batch size
    #[arg(long = "batch_size", default_value = "20")]
    batch_size: usize,

    /// Evaluation batch size
    #[arg(long = "test_batch_size", default_value = "10")]
    test_batch_size: usize,

    /// Dataset to train on
    #[arg(long, value_enum, default_value = "CIFAR10")]
    dataset: DatasetKind,

    /// Checkpoint base path; files go to <checkpoint>_<method>_<network>
    #[arg(short = 'c', long = "checkpoint", default_value = "./checkpoint")]
    checkpoint: PathBuf,

    /// Checkpoint file to resume from
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Dataset root directory
    #[arg(long = "data_dir", default_value = "../data")]
    data_dir: PathBuf,

    /// Side length images are resized to
    #[arg(long = "image_size", default_value = "32")]
    image_size: usize,

    /// Stem channel count of the network
    #[arg(long, default_value = "64")]
    width: usize,

    /// Seed for shuffling and augmentation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Hide the per-batch progress line
    #[arg(long = "no_progress", default_value = "false")]
    no_progress: bool,
}

impl From<Cli> for RunConfig {
    fn from(cli: Cli) -> Self {
        Self {
            network: cli.network,
            method: cli.method,
            nt: cli.nt,
            num_epochs: cli.num_epochs,
            lr: cli.lr,
            batch_size: cli.batch_size,
            test_batch_size: cli.test_batch_size,
            dataset: cli.dataset,
            data_dir: cli.data_dir,
            checkpoint: cli.checkpoint,
            resume: cli.resume,
            image_size: cli.image_size,
            width: cli.width,
            seed: cli.seed,
            show_progress: !cli.no_progress,
            verbose: cli.verbose,
        }
    }
}

fn print_banner(config: &RunConfig) {
    println!("{}", "ANODE training".green().bold());
    println!("  Network:  {}", config.network);
    println!("  Solver:   {} with Nt = {}", config.method, config.nt);
    println!("  Dataset:  {} ({} classes)", config.dataset, config.num_classes());
    println!("  Backend:  {}", backend_name());
    println!();
}

fn main() -> Result<()> {
    let config = RunConfig::from(Cli::parse());

    init_logging(&LogConfig::from_verbosity(config.verbose))
        .context("failed to set up logging")?;
    config.validate().context("invalid configuration")?;
    print_banner(&config);

    let device = default_device();
    info!("Device: {:?}", device);

    let state = training::run::<TrainingBackend>(&config, &device).context("training failed")?;

    println!();
    println!(
        "{} {:.4}",
        "Best Acc@1:".cyan().bold(),
        state.best_accuracy * 100.0
    );
    Ok(())
}
