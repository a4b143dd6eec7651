//! Logging Module
//!
//! Structured logging through the `tracing` crate. `RUST_LOG` takes precedence
//! over the configured level when it is set.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::utils::error::{AnodeError, Result};
use crate::utils::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging a run
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Pick the default or verbose preset from a CLI flag
    pub fn from_verbosity(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_tracing_level())
    }
}

/// Initialize the global subscriber with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids),
        )
        .with(filter)
        .try_init()
        .map_err(|e| AnodeError::Logging(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

/// Epoch-level progress logger
pub struct TrainingLogger {
    first_epoch: usize,
    last_epoch: usize,
    epoch: usize,
    epoch_start: std::time::Instant,
    training_start: std::time::Instant,
}

impl TrainingLogger {
    /// Logger for epochs `first_epoch..first_epoch + num_epochs`
    pub fn new(first_epoch: usize, num_epochs: usize) -> Self {
        Self {
            first_epoch,
            last_epoch: first_epoch + num_epochs.saturating_sub(1),
            epoch: first_epoch,
            epoch_start: std::time::Instant::now(),
            training_start: std::time::Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize, learning_rate: f64) {
        self.epoch = epoch;
        self.epoch_start = std::time::Instant::now();

        tracing::info!(
            "Epoch {}/{} started (lr = {})",
            epoch,
            self.last_epoch,
            learning_rate
        );
    }

    /// Seconds spent in the current epoch so far
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Log end of an epoch with metrics
    pub fn end_epoch(&self, train_loss: f64, test_accuracy: f64, nfe: usize) {
        let done = self.epoch + 1 - self.first_epoch;
        let remaining = self.last_epoch.saturating_sub(self.epoch);
        let avg_epoch_time = self.training_start.elapsed().as_secs_f64() / done.max(1) as f64;

        tracing::info!(
            "Epoch {}/{} completed in {} | Loss: {:.4} | Test Acc: {:.2}% | NFE: {} | ETA: {}",
            self.epoch,
            self.last_epoch,
            format_duration(self.epoch_seconds()),
            train_loss,
            test_accuracy * 100.0,
            nfe,
            format_duration(remaining as f64 * avg_epoch_time)
        );
    }

    /// Log a new best model
    pub fn log_new_best(&self, accuracy: f64) {
        tracing::info!("New best model, accuracy {:.2}%", accuracy * 100.0);
    }
}
