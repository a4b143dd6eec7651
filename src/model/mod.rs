//! Backbone networks with ODE blocks
//!
//! - [`ode`]: the fixed-step integrator and the ODE block
//! - [`resnet`]: ODE ResNet-18
//! - [`sqnxt`]: ODE SqueezeNext-23 1x
//! - [`init`]: the parameter-initialization traversal

pub mod init;
pub mod ode;
pub mod resnet;
pub mod sqnxt;

use std::fmt;
use std::str::FromStr;

use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::training::scheduler::LRScheduler;
use crate::utils::error::{AnodeError, Result as AnodeResult};

pub use init::ParameterInit;
pub use ode::{integrate, IntegrationMethod, OdeBlock, SolverConfig, VelocityField};
pub use resnet::OdeResNet;
pub use sqnxt::OdeSqueezeNext;

/// Backbone variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Network {
    #[serde(rename = "resnet")]
    #[value(name = "resnet")]
    ResNet,
    #[serde(rename = "sqnxt")]
    #[value(name = "sqnxt")]
    SqueezeNext,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::ResNet => "resnet",
            Network::SqueezeNext => "sqnxt",
        }
    }

    /// The learning-rate schedule this network is trained with
    pub fn lr_scheduler(&self, base_lr: f64) -> LRScheduler {
        match self {
            // /10 after epoch 150 and again after 250
            Network::ResNet => LRScheduler::step_decay(base_lr, 0.1, vec![151, 251]),
            // x0.2 after epochs 60, 120 and 160
            Network::SqueezeNext => LRScheduler::step_decay(base_lr, 0.2, vec![61, 121, 161]),
        }
    }

    /// Learning rate for a (1-based) epoch
    pub fn lr_schedule(&self, base_lr: f64, epoch: usize) -> f64 {
        self.lr_scheduler(base_lr).get_lr(epoch)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = AnodeError;

    fn from_str(s: &str) -> AnodeResult<Self> {
        match s {
            "resnet" => Ok(Network::ResNet),
            "sqnxt" => Ok(Network::SqueezeNext),
            _ => Err(AnodeError::InvalidConfiguration(format!(
                "unknown network '{}' (expected resnet or sqnxt)",
                s
            ))),
        }
    }
}

/// Configuration for building a backbone
#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub network: Network,

    pub num_classes: usize,

    pub method: IntegrationMethod,

    /// Integration steps per ODE block
    #[config(default = "2")]
    pub nt: usize,

    /// Channels of the stem; stage widths scale from it
    #[config(default = "64")]
    pub width: usize,
}

impl BackboneConfig {
    pub fn solver(&self) -> AnodeResult<SolverConfig> {
        SolverConfig::new(self.method, self.nt)
    }

    /// Build the network and run the initialization traversal over it
    pub fn init<B: Backend>(&self, device: &B::Device) -> AnodeResult<Backbone<B>> {
        if self.num_classes == 0 || self.width < 2 {
            return Err(AnodeError::InvalidConfiguration(format!(
                "cannot build {} with {} classes and width {}",
                self.network, self.num_classes, self.width
            )));
        }
        let solver = self.solver()?;

        let backbone = match self.network {
            Network::ResNet => {
                Backbone::ResNet(OdeResNet::new(self.num_classes, self.width, solver, device))
            }
            Network::SqueezeNext => Backbone::SqueezeNext(OdeSqueezeNext::new(
                self.num_classes,
                self.width,
                solver,
                device,
            )),
        }
        .init_parameters();

        info!(
            "Built {} ({} classes, width {}, {} parameters, solver {})",
            self.network,
            self.num_classes,
            self.width,
            backbone.num_params(),
            solver
        );
        Ok(backbone)
    }
}

/// Image classifier whose residual stages are ODE blocks
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    ResNet(OdeResNet<B>),
    SqueezeNext(OdeSqueezeNext<B>),
}

impl<B: Backend> Backbone<B> {
    /// Images `[batch, 3, H, W]` to logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::ResNet(net) => net.forward(images),
            Backbone::SqueezeNext(net) => net.forward(images),
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Backbone::ResNet(_) => Network::ResNet,
            Backbone::SqueezeNext(_) => Network::SqueezeNext,
        }
    }

    /// Output classes, read off the classifier weight `[features, classes]`
    pub fn num_classes(&self) -> usize {
        let linear = match self {
            Backbone::ResNet(net) => &net.linear,
            Backbone::SqueezeNext(net) => &net.linear,
        };
        linear.weight.val().dims()[1]
    }

    /// Output channels of the stem convolution
    pub fn width(&self) -> usize {
        let stem = match self {
            Backbone::ResNet(net) => &net.conv1,
            Backbone::SqueezeNext(net) => &net.stem.conv,
        };
        stem.weight.val().dims()[0]
    }

    pub fn ode_blocks(&self) -> Vec<&OdeBlock<B>> {
        match self {
            Backbone::ResNet(net) => net.ode_blocks().collect(),
            Backbone::SqueezeNext(net) => net.ode_blocks().collect(),
        }
    }

    /// Velocity-field evaluations summed over all ODE blocks
    pub fn nfe(&self) -> usize {
        self.ode_blocks().iter().map(|block| block.nfe()).sum()
    }

    pub fn reset_nfe(&self) {
        for block in self.ode_blocks() {
            block.reset_nfe();
        }
    }

    /// Solver configuration shared by the ODE blocks
    pub fn solver(&self) -> Option<SolverConfig> {
        self.ode_blocks().first().map(|block| block.solver())
    }

    /// Apply one solver configuration to every ODE block
    pub fn with_solver(self, solver: SolverConfig) -> Self {
        match self {
            Backbone::ResNet(net) => Backbone::ResNet(net.with_solver(solver)),
            Backbone::SqueezeNext(net) => Backbone::SqueezeNext(net.with_solver(solver)),
        }
    }
}

impl<B: Backend> ParameterInit for Backbone<B> {
    fn init_parameters(self) -> Self {
        match self {
            Backbone::ResNet(net) => Backbone::ResNet(net.init_parameters()),
            Backbone::SqueezeNext(net) => Backbone::SqueezeNext(net.init_parameters()),
        }
    }
}
