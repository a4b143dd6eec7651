//! Learning Rate Scheduler Module
//!
//! Epoch-level learning rate policies. Each network picks its schedule through
//! [`crate::model::Network::lr_scheduler`]; the training loop only asks for
//! the rate of the epoch it is about to run.

use serde::{Deserialize, Serialize};

/// Step decay: the learning rate as a pure function of the (1-based) epoch.
///
/// `initial_lr` times `decay_factor` once per milestone already reached.
/// A milestone is the first epoch trained at the decayed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LRScheduler {
    pub initial_lr: f64,
    pub decay_factor: f64,
    pub milestones: Vec<usize>,
}

impl LRScheduler {
    pub fn step_decay(initial_lr: f64, decay_factor: f64, milestones: Vec<usize>) -> Self {
        Self {
            initial_lr,
            decay_factor,
            milestones,
        }
    }

    pub fn get_lr(&self, epoch: usize) -> f64 {
        let reached = self.milestones.iter().filter(|&&m| epoch >= m).count();
        self.initial_lr * self.decay_factor.powi(reached as i32)
    }

    /// One-line summary for the run log
    pub fn description(&self) -> String {
        format!(
            "lr {}, x{} from epochs {:?}",
            self.initial_lr, self.decay_factor, self.milestones
        )
    }
}
