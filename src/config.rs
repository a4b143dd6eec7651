//! Run Configuration Module
//!
//! Everything one invocation of the trainer needs, gathered from the CLI,
//! validated once, and written as `config.toml` next to the checkpoints.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{AugmentationConfig, DatasetKind};
use crate::model::{BackboneConfig, IntegrationMethod, Network, SolverConfig};
use crate::training::TrainerConfig;
use crate::utils::error::{AnodeError, Result};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub network: Network,
    pub method: IntegrationMethod,
    /// Integration steps per ODE block
    pub nt: usize,
    pub num_epochs: usize,
    /// Base learning rate; the network's schedule decays it
    pub lr: f64,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub dataset: DatasetKind,
    pub data_dir: PathBuf,
    /// Base of the checkpoint directory name
    pub checkpoint: PathBuf,
    /// Checkpoint file to resume from
    pub resume: Option<PathBuf>,
    pub image_size: usize,
    pub width: usize,
    pub seed: u64,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            network: Network::SqueezeNext,
            method: IntegrationMethod::Euler,
            nt: 2,
            num_epochs: 50,
            lr: 0.1,
            batch_size: 20,
            test_batch_size: 10,
            dataset: DatasetKind::Cifar10,
            data_dir: PathBuf::from("../data"),
            checkpoint: PathBuf::from("./checkpoint"),
            resume: None,
            image_size: 32,
            width: 64,
            seed: 42,
            show_progress: true,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_epochs", self.num_epochs),
            ("batch_size", self.batch_size),
            ("test_batch_size", self.test_batch_size),
            ("Nt", self.nt),
            ("image_size", self.image_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AnodeError::InvalidConfiguration(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.width < 2 {
            return Err(AnodeError::InvalidConfiguration(format!(
                "width must be at least 2, got {}",
                self.width
            )));
        }

        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(AnodeError::InvalidConfiguration(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }

        Ok(())
    }

    pub fn solver(&self) -> Result<SolverConfig> {
        SolverConfig::new(self.method, self.nt)
    }

    pub fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    /// `<checkpoint>_<method>_<network>`
    pub fn checkpoint_dir(&self) -> PathBuf {
        let mut name = self.checkpoint.as_os_str().to_os_string();
        name.push(format!("_{}_{}", self.method, self.network));
        PathBuf::from(name)
    }

    pub fn backbone_config(&self) -> BackboneConfig {
        BackboneConfig::new(self.network, self.num_classes(), self.method)
            .with_nt(self.nt)
            .with_width(self.width)
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            num_epochs: self.num_epochs,
            batch_size: self.batch_size,
            test_batch_size: self.test_batch_size,
            seed: self.seed,
            show_progress: self.show_progress,
            augmentation: AugmentationConfig::default(),
        }
    }

    /// Write `config.toml` into `dir`
    pub fn save_toml(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let text = toml::to_string_pretty(self)
            .map_err(|e| AnodeError::Serialization(format!("Failed to encode config: {e}")))?;
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, text)?;
        Ok(path)
    }

    pub fn load_toml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| AnodeError::Serialization(format!("Failed to parse {}: {e}", path.display())))
    }
}
