//! ODE SqueezeNext-23 (1x)
//!
//! Stage widths are `w/2, w, 2w, 4w`. A SqueezeNext unit factors a 3x3
//! convolution into 1x3 and 3x1 after two 1x1 squeezes, then expands back
//! with a final 1x1. The stage transitions are full units with a projection
//! shortcut; the ODE blocks use the same five convolutions as velocity field.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::init::ParameterInit;
use crate::model::ode::{OdeBlock, SolverConfig, VelocityField};
use crate::model::resnet::Projection;

const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Channel reduction of the first squeeze
fn reduction(channels_in: usize, channels_out: usize, stride: usize) -> f64 {
    if stride == 2 {
        1.0
    } else if channels_in > channels_out {
        0.25
    } else {
        0.5
    }
}

fn scaled(channels: usize, factor: f64) -> usize {
    ((channels as f64 * factor) as usize).max(1)
}

/// Conv followed by batch norm and ReLU
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    fn new(config: Conv2dConfig, device: &B::Device) -> Self {
        let channels_out = config.channels[1];
        Self {
            conv: config.init(device),
            bn: BatchNormConfig::new(channels_out).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

impl<B: Backend> ParameterInit for ConvBnRelu<B> {
    fn init_parameters(mut self) -> Self {
        self.conv = self.conv.init_parameters();
        self.bn = self.bn.init_parameters();
        self
    }
}

/// The five convolutions shared by transitions and velocity fields
#[derive(Module, Debug)]
pub struct SqueezeUnit<B: Backend> {
    pub reduce: ConvBnRelu<B>,
    pub squeeze: ConvBnRelu<B>,
    pub conv_1x3: ConvBnRelu<B>,
    pub conv_3x1: ConvBnRelu<B>,
    pub expand: ConvBnRelu<B>,
}

impl<B: Backend> SqueezeUnit<B> {
    pub fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        let ratio = reduction(channels_in, channels_out, stride);
        let reduced = scaled(channels_in, ratio);
        let squeezed = scaled(channels_in, ratio * 0.5);

        Self {
            reduce: ConvBnRelu::new(
                Conv2dConfig::new([channels_in, reduced], [1, 1]).with_stride([stride, stride]),
                device,
            ),
            squeeze: ConvBnRelu::new(Conv2dConfig::new([reduced, squeezed], [1, 1]), device),
            conv_1x3: ConvBnRelu::new(
                Conv2dConfig::new([squeezed, reduced], [1, 3])
                    .with_padding(PaddingConfig2d::Explicit(0, 1)),
                device,
            ),
            conv_3x1: ConvBnRelu::new(
                Conv2dConfig::new([reduced, reduced], [3, 1])
                    .with_padding(PaddingConfig2d::Explicit(1, 0)),
                device,
            ),
            expand: ConvBnRelu::new(Conv2dConfig::new([reduced, channels_out], [1, 1]), device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.reduce.forward(x);
        let x = self.squeeze.forward(x);
        let x = self.conv_1x3.forward(x);
        let x = self.conv_3x1.forward(x);
        self.expand.forward(x)
    }
}

impl<B: Backend> ParameterInit for SqueezeUnit<B> {
    fn init_parameters(mut self) -> Self {
        self.reduce = self.reduce.init_parameters();
        self.squeeze = self.squeeze.init_parameters();
        self.conv_1x3 = self.conv_1x3.init_parameters();
        self.conv_3x1 = self.conv_3x1.init_parameters();
        self.expand = self.expand.init_parameters();
        self
    }
}

/// SqueezeNext unit with residual connection, opening a stage
#[derive(Module, Debug)]
pub struct SqueezeNextBlock<B: Backend> {
    pub unit: SqueezeUnit<B>,
    pub shortcut: Option<Projection<B>>,
    relu: Relu,
}

impl<B: Backend> SqueezeNextBlock<B> {
    pub fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || channels_in != channels_out)
            .then(|| Projection::new(channels_in, channels_out, stride, device));

        Self {
            unit: SqueezeUnit::new(channels_in, channels_out, stride, device),
            shortcut,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.unit.forward(x.clone());
        let identity = match &self.shortcut {
            Some(projection) => self.relu.forward(projection.forward(x)),
            None => x,
        };
        self.relu.forward(out + identity)
    }
}

impl<B: Backend> ParameterInit for SqueezeNextBlock<B> {
    fn init_parameters(mut self) -> Self {
        self.unit = self.unit.init_parameters();
        self.shortcut = self.shortcut.init_parameters();
        self
    }
}

/// Velocity field of a SqueezeNext ODE block
#[derive(Module, Debug)]
pub struct SqueezeNextField<B: Backend> {
    pub unit: SqueezeUnit<B>,
}

impl<B: Backend> SqueezeNextField<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            unit: SqueezeUnit::new(channels, channels, 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.unit.forward(x)
    }
}

impl<B: Backend> ParameterInit for SqueezeNextField<B> {
    fn init_parameters(mut self) -> Self {
        self.unit = self.unit.init_parameters();
        self
    }
}

#[derive(Module, Debug)]
pub struct SqueezeNextStage<B: Backend> {
    pub transition: SqueezeNextBlock<B>,
    pub ode: OdeBlock<B>,
}

impl<B: Backend> ParameterInit for SqueezeNextStage<B> {
    fn init_parameters(mut self) -> Self {
        self.transition = self.transition.init_parameters();
        self.ode = self.ode.init_parameters();
        self
    }
}

/// SqueezeNext-23 1x with ODE blocks
#[derive(Module, Debug)]
pub struct OdeSqueezeNext<B: Backend> {
    pub stem: ConvBnRelu<B>,
    pub stages: Vec<SqueezeNextStage<B>>,
    pub head: ConvBnRelu<B>,
    pub pool: AdaptiveAvgPool2d,
    pub linear: Linear<B>,
}

impl<B: Backend> OdeSqueezeNext<B> {
    pub fn new(num_classes: usize, width: usize, solver: SolverConfig, device: &B::Device) -> Self {
        let stage_widths = [width / 2, width, width * 2, width * 4].map(|c| c.max(1));
        let mut channels_in = width;
        let mut stages = Vec::with_capacity(STAGE_STRIDES.len());

        for (channels_out, stride) in stage_widths.into_iter().zip(STAGE_STRIDES) {
            let field = VelocityField::SqueezeNext(SqueezeNextField::new(channels_out, device));
            stages.push(SqueezeNextStage {
                transition: SqueezeNextBlock::new(channels_in, channels_out, stride, device),
                ode: OdeBlock::new(field, solver),
            });
            channels_in = channels_out;
        }

        let head_channels = width * 2;
        Self {
            stem: ConvBnRelu::new(
                Conv2dConfig::new([3, width], [3, 3]).with_padding(PaddingConfig2d::Explicit(1, 1)),
                device,
            ),
            stages,
            head: ConvBnRelu::new(Conv2dConfig::new([channels_in, head_channels], [1, 1]), device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            linear: LinearConfig::new(head_channels, num_classes).init(device),
        }
    }

    /// Images `[batch, 3, H, W]` to logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(images);
        for stage in &self.stages {
            x = stage.ode.forward(stage.transition.forward(x));
        }
        let x = self.head.forward(x);
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        self.linear.forward(x)
    }

    pub fn ode_blocks(&self) -> impl Iterator<Item = &OdeBlock<B>> {
        self.stages.iter().map(|stage| &stage.ode)
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.stages = self
            .stages
            .into_iter()
            .map(|mut stage| {
                stage.ode = stage.ode.with_solver(solver);
                stage
            })
            .collect();
        self
    }
}

impl<B: Backend> ParameterInit for OdeSqueezeNext<B> {
    fn init_parameters(mut self) -> Self {
        self.stem = self.stem.init_parameters();
        self.stages = self.stages.init_parameters();
        self.head = self.head.init_parameters();
        self
    }
}
