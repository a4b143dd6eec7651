//! Training Module
//!
//! The epoch loop, evaluation, checkpointing and learning-rate schedules.
//! [`run`] wires a [`RunConfig`] into all of them.

pub mod checkpoint;
pub mod evaluator;
pub mod scheduler;
pub mod trainer;

use burn::{
    optim::{adaptor::OptimizerAdaptor, decay::WeightDecayConfig, momentum::MomentumConfig, Sgd, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::{RunConfig, CONFIG_FILE};
use crate::model::Backbone;
use crate::utils::error::{AnodeError, Result};

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use evaluator::evaluate;
pub use scheduler::LRScheduler;
pub use trainer::{Trainer, TrainerConfig, TrainingState};

/// SGD over the backbone's parameters
pub type SgdOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, Backbone<B>, B>;

/// Momentum 0.9 without dampening, weight decay 5e-4
pub fn sgd_config() -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new().with_momentum(0.9).with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(5e-4)))
}

pub fn init_optimizer<B: AutodiffBackend>() -> SgdOptimizer<B> {
    sgd_config().init()
}

/// Per-batch progress line. `None` gives a hidden bar.
pub fn progress_bar(len: usize, label: Option<&str>) -> ProgressBar {
    let Some(label) = label else {
        return ProgressBar::hidden();
    };

    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_prefix(format!("{} {}", Local::now().format("%H:%M:%S"), label));
    bar
}

/// Build or restore the training state for `config` and run every epoch.
///
/// Returns the final state; its `best_accuracy` is what the CLI reports.
pub fn run<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<TrainingState<B>> {
    config.validate()?;

    B::seed(config.seed);
    let model = config.backbone_config().init::<B>(device)?;
    let optimizer = init_optimizer::<B>();

    let (checkpoints, state) = match &config.resume {
        Some(path) => {
            let (manager, checkpoint) = CheckpointManager::resume(path)?;
            let previous = manager.checkpoint_dir().join(CONFIG_FILE);
            if previous.is_file() {
                let previous = RunConfig::load_toml(&previous)?;
                if previous.dataset != config.dataset {
                    return Err(AnodeError::InvalidConfiguration(format!(
                        "checkpoint was trained on {} but the run uses {}",
                        previous.dataset, config.dataset
                    )));
                }
            }
            let recorded = checkpoint.solver()?;
            if recorded != config.solver()? {
                info!("Checkpoint used {}, continuing with {}", recorded, config.solver()?);
            }
            (manager, checkpoint.restore(model, optimizer, device)?)
        }
        None => (
            CheckpointManager::new(config.checkpoint_dir()),
            TrainingState::new(model, optimizer),
        ),
    };

    config.save_toml(checkpoints.checkpoint_dir())?;
    info!(
        "Checkpoints go to {}",
        checkpoints.checkpoint_dir().display()
    );

    let splits = config
        .dataset
        .load_splits(&config.data_dir, config.image_size)?;

    let trainer = Trainer::<B>::new(
        config.trainer_config(),
        config.network.lr_scheduler(config.lr),
        config.image_size,
        checkpoints,
        device.clone(),
    );
    trainer.fit(state, &splits)
}
