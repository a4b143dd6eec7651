//! # ANODE training
//!
//! Trains image classifiers whose residual stages are ODE blocks: each block
//! integrates a learned velocity field with a fixed-step Euler, RK2 or RK4
//! solver, and gradients flow through the discretized solve with activation
//! recomputation on the backward pass.
//!
//! ## Modules
//!
//! - `model`: the ODE block, ODE ResNet-18 and ODE SqueezeNext-23
//! - `dataset`: CIFAR-10 and class-folder datasets, augmentation, batching
//! - `training`: epoch loop, evaluation, checkpoints, learning-rate schedules
//! - `config`: the resolved configuration of one run
//! - `utils`: errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use anode_train::backend::{default_device, TrainingBackend};
//! use anode_train::{run, RunConfig};
//!
//! let config = RunConfig { num_epochs: 1, ..Default::default() };
//! let state = run::<TrainingBackend>(&config, &default_device())?;
//! println!("best accuracy {:.4}", state.best_accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

pub use config::RunConfig;
pub use dataset::{DatasetKind, InMemoryDataset};
pub use model::{Backbone, BackboneConfig, IntegrationMethod, Network, OdeBlock, SolverConfig};
pub use training::{run, Checkpoint, CheckpointManager, Trainer, TrainerConfig, TrainingState};
pub use utils::error::{AnodeError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
