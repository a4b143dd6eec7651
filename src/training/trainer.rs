//! Epoch loop
//!
//! One epoch is a shuffled pass over the train split with an SGD step per
//! batch, then a pass over the test split on the inference copy of the
//! model, then a checkpoint. [`TrainingState`] is everything that survives
//! from one epoch to the next.

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::{
    AugmentationConfig, Augmenter, DataSplits, ImageBatch, ImageBatcher, InMemoryDataset,
};
use crate::model::Backbone;
use crate::training::checkpoint::{Checkpoint, CheckpointManager};
use crate::training::evaluator::{correct_predictions, evaluate};
use crate::training::scheduler::LRScheduler;
use crate::training::{progress_bar, SgdOptimizer};
use crate::utils::error::Result;
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{EpochMetrics, RunningMetrics, TrainingHistory};

/// Model, optimizer and the counters carried across epochs
pub struct TrainingState<B: AutodiffBackend> {
    /// Next epoch to run, starting at 1
    pub epoch: usize,
    pub best_accuracy: f64,
    pub model: Backbone<B>,
    pub optimizer: SgdOptimizer<B>,
}

impl<B: AutodiffBackend> TrainingState<B> {
    pub fn new(model: Backbone<B>, optimizer: SgdOptimizer<B>) -> Self {
        Self {
            epoch: 1,
            best_accuracy: 0.0,
            model,
            optimizer,
        }
    }

    /// Fold in an epoch's test accuracy; true when it strictly beats the previous best
    pub fn record_accuracy(&mut self, accuracy: f64) -> bool {
        let is_best = accuracy > self.best_accuracy;
        self.best_accuracy = self.best_accuracy.max(accuracy);
        is_best
    }
}

/// Loop hyperparameters
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub seed: u64,
    pub show_progress: bool,
    pub augmentation: AugmentationConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 20,
            test_batch_size: 10,
            seed: 42,
            show_progress: true,
            augmentation: AugmentationConfig::default(),
        }
    }
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    scheduler: LRScheduler,
    batcher: ImageBatcher,
    augmenter: Augmenter,
    checkpoints: CheckpointManager,
    history: TrainingHistory,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        config: TrainerConfig,
        scheduler: LRScheduler,
        image_size: usize,
        checkpoints: CheckpointManager,
        device: B::Device,
    ) -> Self {
        let history = TrainingHistory::new(checkpoints.checkpoint_dir());
        Self {
            augmenter: Augmenter::new(config.augmentation.clone()),
            batcher: ImageBatcher::new(image_size),
            config,
            scheduler,
            checkpoints,
            history,
            device,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Sample order of an epoch; depends only on the seed and the epoch number
    pub fn epoch_order(&self, len: usize, epoch: usize) -> (Vec<usize>, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        (order, rng)
    }

    /// One pass over `dataset` with an optimizer step per batch
    pub fn train_epoch(
        &self,
        mut model: Backbone<B>,
        optimizer: &mut SgdOptimizer<B>,
        dataset: &InMemoryDataset,
        epoch: usize,
        learning_rate: f64,
    ) -> (Backbone<B>, RunningMetrics) {
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let (order, mut rng) = self.epoch_order(burn::data::dataset::Dataset::len(dataset), epoch);
        let batch_size = self.config.batch_size.max(1);

        let progress = progress_bar(
            order.len().div_ceil(batch_size),
            self.config.show_progress.then_some("Train"),
        );
        let mut running = RunningMetrics::new();

        for chunk in order.chunks(batch_size) {
            let mut items = dataset.gather(chunk);
            if !self.augmenter.config().is_identity() {
                for item in &mut items {
                    self.augmenter.augment(item, &mut rng);
                }
            }
            let batch: ImageBatch<B> = self.batcher.batch_on(items, &self.device);

            let logits = model.forward(batch.images.clone());
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            running.update(loss_value, correct_predictions(logits, &batch), chunk.len());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            progress.inc(1);
            progress.set_message(running.progress_message());
        }

        progress.finish();
        (model, running)
    }

    /// Run `num_epochs` epochs starting at `state.epoch`
    pub fn fit(&self, mut state: TrainingState<B>, splits: &DataSplits) -> Result<TrainingState<B>> {
        let first_epoch = state.epoch;
        let mut logger = TrainingLogger::new(first_epoch, self.config.num_epochs);
        tracing::info!("Schedule: {}", self.scheduler.description());

        for epoch in first_epoch..first_epoch + self.config.num_epochs {
            let learning_rate = self.scheduler.get_lr(epoch);
            logger.start_epoch(epoch, learning_rate);
            state.model.reset_nfe();

            let (model, train) = self.train_epoch(
                state.model,
                &mut state.optimizer,
                &splits.train,
                epoch,
                learning_rate,
            );
            state.model = model;

            let eval_batches = burn::data::dataset::Dataset::len(&splits.test)
                .div_ceil(self.config.test_batch_size.max(1));
            let test = evaluate(
                &state.model.valid(),
                &splits.test,
                &self.batcher,
                self.config.test_batch_size,
                &self.device,
                progress_bar(eval_batches, self.config.show_progress.then_some("Test ")),
            );
            let nfe = state.model.nfe();

            state.epoch = epoch + 1;
            let is_best = state.record_accuracy(test.accuracy());
            let checkpoint = Checkpoint::capture(&state, test.accuracy())?;
            self.checkpoints.save(&checkpoint, is_best)?;

            self.history.append(&EpochMetrics {
                epoch,
                learning_rate,
                train_loss: train.loss(),
                train_accuracy: train.accuracy(),
                test_loss: test.loss(),
                test_accuracy: test.accuracy(),
                seconds: logger.epoch_seconds(),
                nfe,
            })?;

            logger.end_epoch(train.loss(), test.accuracy(), nfe);
            if is_best {
                logger.log_new_best(test.accuracy());
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic;
    use crate::model::{BackboneConfig, IntegrationMethod, Network};
    use crate::training::init_optimizer;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn state(device: &<TestBackend as burn::tensor::backend::Backend>::Device) -> TrainingState<TestBackend> {
        let model = BackboneConfig::new(Network::ResNet, 2, IntegrationMethod::Euler)
            .with_nt(1)
            .with_width(2)
            .init::<TestBackend>(device)
            .unwrap();
        TrainingState::new(model, init_optimizer::<TestBackend>())
    }

    fn trainer(dir: &std::path::Path, num_epochs: usize) -> Trainer<TestBackend> {
        let config = TrainerConfig {
            num_epochs,
            batch_size: 2,
            test_batch_size: 2,
            show_progress: false,
            ..Default::default()
        };
        Trainer::new(
            config,
            Network::ResNet.lr_scheduler(0.05),
            8,
            CheckpointManager::new(dir.to_path_buf()),
            Default::default(),
        )
    }

    #[test]
    fn test_record_accuracy_strictly_greater() {
        let device = Default::default();
        let mut state = state(&device);

        assert!(state.record_accuracy(0.4));
        assert_eq!(state.best_accuracy, 0.4);
        assert!(!state.record_accuracy(0.4));
        assert!(!state.record_accuracy(0.3));
        assert_eq!(state.best_accuracy, 0.4);
        assert!(state.record_accuracy(0.41));
        assert_eq!(state.best_accuracy, 0.41);
    }

    #[test]
    fn test_epoch_order_is_seeded_per_epoch() {
        let temp_dir = TempDir::new().unwrap();
        let trainer = trainer(temp_dir.path(), 1);

        let (a, _) = trainer.epoch_order(20, 3);
        let (b, _) = trainer.epoch_order(20, 3);
        let (c, _) = trainer.epoch_order(20, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_fit_writes_checkpoint_and_history() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let trainer = trainer(temp_dir.path(), 2);
        let splits = DataSplits {
            train: synthetic::separable(2, 2, 8, 3),
            test: synthetic::separable(2, 2, 8, 4),
        };

        let state = trainer.fit(state(&device), &splits).unwrap();
        assert_eq!(state.epoch, 3);
        assert!((0.0..=1.0).contains(&state.best_accuracy));
        assert!(trainer.checkpoints().checkpoint_path().is_file());

        let history = std::fs::read_to_string(temp_dir.path().join("metrics.csv")).unwrap();
        assert_eq!(history.lines().count(), 3);
        assert!(history.lines().nth(1).unwrap().starts_with("1,"));

        let checkpoint = Checkpoint::load(&trainer.checkpoints().checkpoint_path()).unwrap();
        assert_eq!(checkpoint.epoch, 3);
        assert_eq!(checkpoint.best_accuracy, state.best_accuracy);
    }

    #[test]
    fn test_second_epoch_loss_not_higher() {
        use burn::tensor::backend::Backend;

        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        TestBackend::seed(11);

        let model = BackboneConfig::new(Network::ResNet, 2, IntegrationMethod::Euler)
            .with_nt(1)
            .with_width(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let mut optimizer = init_optimizer::<TestBackend>();
        let trainer = Trainer::<TestBackend>::new(
            TrainerConfig {
                num_epochs: 2,
                batch_size: 8,
                test_batch_size: 8,
                seed: 11,
                show_progress: false,
                augmentation: AugmentationConfig::none(),
            },
            Network::ResNet.lr_scheduler(0.02),
            8,
            CheckpointManager::new(temp_dir.path().to_path_buf()),
            device,
        );
        let train = synthetic::separable(2, 16, 8, 5);

        let (model, first) = trainer.train_epoch(model, &mut optimizer, &train, 1, 0.02);
        let (_, second) = trainer.train_epoch(model, &mut optimizer, &train, 2, 0.02);
        assert!(first.loss().is_finite());
        assert!(
            second.loss() <= first.loss(),
            "epoch 2 loss {} above epoch 1 loss {}",
            second.loss(),
            first.loss()
        );
    }
}
