//! Checkpointing and resume
//!
//! A checkpoint is one bincode file holding the run metadata plus the model
//! and optimizer records (Burn `BinBytesRecorder`, full precision). It is
//! rewritten every epoch as `checkpoint.bin` and copied to `model_best.bin`
//! whenever the epoch sets a new best accuracy.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    optim::Optimizer,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::AutodiffBackend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{Backbone, IntegrationMethod, Network, SolverConfig};
use crate::training::{SgdOptimizer, TrainingState};
use crate::utils::error::{AnodeError, Result};

pub const CHECKPOINT_FILE: &str = "checkpoint.bin";
pub const BEST_FILE: &str = "model_best.bin";

fn recorder() -> BinBytesRecorder<FullPrecisionSettings> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
}

/// Everything needed to continue a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Next epoch to run
    pub epoch: usize,
    /// Test accuracy of the epoch that wrote this checkpoint
    pub accuracy: f64,
    pub best_accuracy: f64,
    pub network: Network,
    /// Stem channels of the recorded model
    pub width: usize,
    pub num_classes: usize,
    pub method: IntegrationMethod,
    pub nt: usize,
    pub timestamp: String,
    pub model_record: Vec<u8>,
    pub optimizer_record: Vec<u8>,
}

impl Checkpoint {
    /// Snapshot a training state after an epoch with the given test accuracy
    pub fn capture<B: AutodiffBackend>(state: &TrainingState<B>, accuracy: f64) -> Result<Self> {
        let recorder = recorder();
        let model_record = Recorder::<B>::record(&recorder, state.model.clone().into_record(), ())
            .map_err(|e| AnodeError::Checkpoint(format!("Failed to record model: {:?}", e)))?;
        let optimizer_record = Recorder::<B>::record(&recorder, state.optimizer.to_record(), ())
            .map_err(|e| AnodeError::Checkpoint(format!("Failed to record optimizer: {:?}", e)))?;

        let solver = state.model.solver().ok_or_else(|| {
            AnodeError::InvalidConfiguration("model has no ODE blocks".to_string())
        })?;

        Ok(Self {
            epoch: state.epoch,
            accuracy,
            best_accuracy: state.best_accuracy,
            network: state.model.network(),
            width: state.model.width(),
            num_classes: state.model.num_classes(),
            method: solver.method(),
            nt: solver.nt(),
            timestamp: Utc::now().to_rfc3339(),
            model_record,
            optimizer_record,
        })
    }

    pub fn solver(&self) -> Result<SolverConfig> {
        SolverConfig::new(self.method, self.nt)
    }

    /// Write to `path`, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)
            .map_err(|e| AnodeError::Serialization(format!("Failed to serialize checkpoint: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        bincode::deserialize_from(reader)
            .map_err(|e| AnodeError::Serialization(format!("Failed to deserialize checkpoint: {}", e)))
    }

    /// Load the recorded parameters and optimizer state into freshly built ones
    pub fn restore<B: AutodiffBackend>(
        self,
        model: Backbone<B>,
        optimizer: SgdOptimizer<B>,
        device: &B::Device,
    ) -> Result<TrainingState<B>> {
        if self.network != model.network() {
            return Err(AnodeError::InvalidConfiguration(format!(
                "checkpoint was written by {} but the model is {}",
                self.network,
                model.network()
            )));
        }
        if self.width != model.width() || self.num_classes != model.num_classes() {
            return Err(AnodeError::InvalidConfiguration(format!(
                "checkpoint holds width {} with {} classes but the model has width {} with {} classes",
                self.width,
                self.num_classes,
                model.width(),
                model.num_classes()
            )));
        }

        let recorder = recorder();
        let model_record = Recorder::<B>::load(&recorder, self.model_record, device)
            .map_err(|e| AnodeError::Checkpoint(format!("Failed to load model record: {:?}", e)))?;
        let optimizer_record = Recorder::<B>::load(&recorder, self.optimizer_record, device)
            .map_err(|e| {
                AnodeError::Checkpoint(format!("Failed to load optimizer record: {:?}", e))
            })?;

        Ok(TrainingState {
            epoch: self.epoch,
            best_accuracy: self.best_accuracy,
            model: model.load_record(model_record),
            optimizer: optimizer.load_record(optimizer_record),
        })
    }
}

/// Owns the checkpoint directory of a run
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: PathBuf) -> Self {
        Self { checkpoint_dir }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir.join(CHECKPOINT_FILE)
    }

    pub fn best_path(&self) -> PathBuf {
        self.checkpoint_dir.join(BEST_FILE)
    }

    /// Write the latest checkpoint and mirror it as best when `is_best`
    pub fn save(&self, checkpoint: &Checkpoint, is_best: bool) -> Result<()> {
        fs::create_dir_all(&self.checkpoint_dir)?;

        let path = self.checkpoint_path();
        checkpoint.save(&path)?;
        info!("Checkpoint saved to {:?} (next epoch {})", path, checkpoint.epoch);

        if is_best {
            fs::copy(&path, self.best_path())?;
            info!("Best model checkpoint saved");
        }
        Ok(())
    }

    /// Read a checkpoint file for resuming. Later saves go next to it.
    pub fn resume(path: &Path) -> Result<(Self, Checkpoint)> {
        if !path.is_file() {
            return Err(AnodeError::CheckpointNotFound(path.to_path_buf()));
        }

        let checkpoint = Checkpoint::load(path)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(
            "Resuming from {:?} at epoch {} (best accuracy {:.4})",
            path, checkpoint.epoch, checkpoint.best_accuracy
        );
        Ok((Self::new(dir), checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneConfig;
    use crate::training::init_optimizer;
    use burn::backend::Autodiff;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    type Device = <TestBackend as burn::tensor::backend::Backend>::Device;

    fn resnet(width: usize, num_classes: usize, device: &Device) -> Backbone<TestBackend> {
        BackboneConfig::new(Network::ResNet, num_classes, IntegrationMethod::Rk2)
            .with_nt(1)
            .with_width(width)
            .init::<TestBackend>(device)
            .unwrap()
    }

    fn small_state(device: &Device) -> TrainingState<TestBackend> {
        TrainingState::new(resnet(2, 2, device), init_optimizer::<TestBackend>())
    }

    /// Every parameter and batch-norm statistic, full precision
    fn model_bytes(model: &Backbone<TestBackend>) -> Vec<u8> {
        Recorder::<TestBackend>::record(&recorder(), model.clone().into_record(), ()).unwrap()
    }

    fn sgd_step(state: &mut TrainingState<TestBackend>, images: Tensor<TestBackend, 4>) {
        let loss = state.model.forward(images).mean();
        let grads = burn::optim::GradientsParams::from_grads(loss.backward(), &state.model);
        state.model = state.optimizer.step(0.1, state.model.clone(), grads);
    }

    #[test]
    fn test_resume_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.bin");
        assert!(matches!(
            CheckpointManager::resume(&missing),
            Err(AnodeError::CheckpointNotFound(_))
        ));
        // A directory is not a checkpoint either
        assert!(matches!(
            CheckpointManager::resume(temp_dir.path()),
            Err(AnodeError::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn test_best_copy_only_when_best() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut state = small_state(&device);
        let manager = CheckpointManager::new(temp_dir.path().join("run_Euler_resnet"));

        state.epoch = 2;
        let checkpoint = Checkpoint::capture(&state, 0.3).unwrap();
        manager.save(&checkpoint, false).unwrap();
        assert!(manager.checkpoint_path().is_file());
        assert!(!manager.best_path().exists());

        manager.save(&checkpoint, true).unwrap();
        assert_eq!(
            fs::read(manager.best_path()).unwrap(),
            fs::read(manager.checkpoint_path()).unwrap()
        );
    }

    #[test]
    fn test_round_trip_restores_state() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut state = small_state(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [2, 3, 8, 8],
            burn::tensor::Distribution::Default,
            &device,
        );

        // One optimizer step so the momentum buffers exist
        sgd_step(&mut state, images.clone());
        state.epoch = 5;
        state.best_accuracy = 0.625;

        let manager = CheckpointManager::new(temp_dir.path().to_path_buf());
        let checkpoint = Checkpoint::capture(&state, 0.5).unwrap();
        manager.save(&checkpoint, true).unwrap();

        let (resumed_manager, loaded) = CheckpointManager::resume(&manager.checkpoint_path()).unwrap();
        assert_eq!(resumed_manager.checkpoint_dir(), temp_dir.path());
        assert_eq!(loaded.epoch, 5);
        assert_eq!(loaded.accuracy, 0.5);
        assert_eq!((loaded.width, loaded.num_classes), (2, 2));
        assert_eq!(loaded.solver().unwrap(), state.model.solver().unwrap());

        let mut restored = loaded
            .restore(small_state(&device).model, init_optimizer::<TestBackend>(), &device)
            .unwrap();
        assert_eq!(restored.epoch, 5);
        assert_eq!(restored.best_accuracy, 0.625);
        assert_eq!(model_bytes(&restored.model), model_bytes(&state.model));

        // The same step from both sides only agrees if the momentum came back too
        sgd_step(&mut state, images.clone());
        sgd_step(&mut restored, images);
        assert_eq!(model_bytes(&restored.model), model_bytes(&state.model));
    }

    #[test]
    fn test_restore_rejects_other_width() {
        let device = Default::default();
        let checkpoint = Checkpoint::capture(&small_state(&device), 0.1).unwrap();
        assert_eq!(checkpoint.width, 2);

        let wider = resnet(4, 2, &device);
        assert!(matches!(
            checkpoint.restore(wider, init_optimizer::<TestBackend>(), &device),
            Err(AnodeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_restore_rejects_other_class_count() {
        let device = Default::default();
        let checkpoint = Checkpoint::capture(&small_state(&device), 0.1).unwrap();

        let more_classes = resnet(2, 10, &device);
        assert!(matches!(
            checkpoint.restore(more_classes, init_optimizer::<TestBackend>(), &device),
            Err(AnodeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_restore_rejects_other_network() {
        let device = Default::default();
        let state = small_state(&device);
        let checkpoint = Checkpoint::capture(&state, 0.1).unwrap();

        let sqnxt = BackboneConfig::new(Network::SqueezeNext, 2, IntegrationMethod::Rk2)
            .with_nt(1)
            .with_width(4)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(matches!(
            checkpoint.restore(sqnxt, init_optimizer::<TestBackend>(), &device),
            Err(AnodeError::InvalidConfiguration(_))
        ));
    }
}
