//! Metrics Module
//!
//! Running loss/accuracy accumulators used while a split is traversed, and the
//! per-epoch history written to `metrics.csv`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::Result;

/// Cumulative loss and top-1 accuracy over the batches seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    /// Sum of per-sample losses
    loss_sum: f64,
    /// Samples whose arg-max matched the label
    correct: usize,
    /// Samples seen
    total: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch given its mean loss, correct count and size
    pub fn update(&mut self, batch_mean_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_mean_loss * batch_size as f64;
        self.correct += correct;
        self.total += batch_size;
    }

    /// Average loss per sample so far
    pub fn loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.loss_sum / self.total as f64
        }
    }

    /// Fraction of correct predictions in [0, 1]
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// The in-place progress line shown while a split is traversed
    pub fn progress_message(&self) -> String {
        format!(
            "Loss: {:.3} | Acc: {:.3}% ({}/{})",
            self.loss(),
            100.0 * self.accuracy(),
            self.correct,
            self.total
        )
    }
}

/// One row of the training history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub test_loss: f64,
    pub test_accuracy: f64,
    pub seconds: f64,
    /// Velocity-field evaluations during the epoch, all ODE blocks combined
    pub nfe: usize,
}

impl EpochMetrics {
    const CSV_HEADER: &'static str =
        "epoch,learning_rate,train_loss,train_acc,test_loss,test_acc,seconds,nfe";

    fn to_csv_row(&self) -> String {
        format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.2},{}",
            self.epoch,
            self.learning_rate,
            self.train_loss,
            self.train_accuracy,
            self.test_loss,
            self.test_accuracy,
            self.seconds,
            self.nfe
        )
    }
}

/// Append-only CSV log of epoch metrics, kept next to the checkpoints
#[derive(Debug, Clone)]
pub struct TrainingHistory {
    path: PathBuf,
}

impl TrainingHistory {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("metrics.csv"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one epoch, writing the header first if the file is new
    pub fn append(&self, metrics: &EpochMetrics) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if is_new {
            writeln!(file, "{}", EpochMetrics::CSV_HEADER)?;
        }
        writeln!(file, "{}", metrics.to_csv_row())?;

        debug!("Appended epoch {} to {}", metrics.epoch, self.path.display());
        Ok(())
    }
}
