//! ODE ResNet-18
//!
//! Four stages of widths `w, 2w, 4w, 8w`. Each stage opens with a residual
//! basic block (strided except in the first stage) and continues with one ODE
//! block whose velocity field is conv-bn-relu-conv-bn at constant width.

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

const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

fn conv3x3<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// 1x1 projection used when a block changes resolution or width
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    pub fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([channels_in, channels_out], [1, 1])
                .with_stride([stride, stride])
                .init(device),
            bn: BatchNormConfig::new(channels_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

impl<B: Backend> ParameterInit for Projection<B> {
    fn init_parameters(mut self) -> Self {
        self.conv = self.conv.init_parameters();
        self.bn = self.bn.init_parameters();
        self
    }
}

/// Residual basic block opening a stage
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub shortcut: Option<Projection<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || channels_in != channels_out)
            .then(|| Projection::new(channels_in, channels_out, stride, device));

        Self {
            conv1: conv3x3(channels_in, channels_out, stride, device),
            bn1: BatchNormConfig::new(channels_out).init(device),
            conv2: conv3x3(channels_out, channels_out, 1, device),
            bn2: BatchNormConfig::new(channels_out).init(device),
            shortcut,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x.clone())));
        let out = self.bn2.forward(self.conv2.forward(out));
        let identity = match &self.shortcut {
            Some(projection) => projection.forward(x),
            None => x,
        };
        self.relu.forward(out + identity)
    }
}

impl<B: Backend> ParameterInit for BasicBlock<B> {
    fn init_parameters(mut self) -> Self {
        self.conv1 = self.conv1.init_parameters();
        self.bn1 = self.bn1.init_parameters();
        self.conv2 = self.conv2.init_parameters();
        self.bn2 = self.bn2.init_parameters();
        self.shortcut = self.shortcut.init_parameters();
        self
    }
}

/// Velocity field of a ResNet ODE block: the residual branch of a basic block
#[derive(Module, Debug)]
pub struct ResidualField<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ResidualField<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv3x3(channels, channels, 1, device),
            bn1: BatchNormConfig::new(channels).init(device),
            conv2: conv3x3(channels, channels, 1, device),
            bn2: BatchNormConfig::new(channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        self.bn2.forward(self.conv2.forward(out))
    }
}

impl<B: Backend> ParameterInit for ResidualField<B> {
    fn init_parameters(mut self) -> Self {
        self.conv1 = self.conv1.init_parameters();
        self.bn1 = self.bn1.init_parameters();
        self.conv2 = self.conv2.init_parameters();
        self.bn2 = self.bn2.init_parameters();
        self
    }
}

/// One stage: a basic block followed by an ODE block
#[derive(Module, Debug)]
pub struct ResNetStage<B: Backend> {
    pub transition: BasicBlock<B>,
    pub ode: OdeBlock<B>,
}

impl<B: Backend> ParameterInit for ResNetStage<B> {
    fn init_parameters(mut self) -> Self {
        self.transition = self.transition.init_parameters();
        self.ode = self.ode.init_parameters();
        self
    }
}

/// ResNet-18 with ODE blocks
#[derive(Module, Debug)]
pub struct OdeResNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub stages: Vec<ResNetStage<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub linear: Linear<B>,
    relu: Relu,
}

impl<B: Backend> OdeResNet<B> {
    pub fn new(num_classes: usize, width: usize, solver: SolverConfig, device: &B::Device) -> Self {
        let mut channels_in = width;
        let mut stages = Vec::with_capacity(STAGE_STRIDES.len());

        for (i, stride) in STAGE_STRIDES.into_iter().enumerate() {
            let channels_out = width << i;
            let field = VelocityField::Residual(ResidualField::new(channels_out, device));
            stages.push(ResNetStage {
                transition: BasicBlock::new(channels_in, channels_out, stride, device),
                ode: OdeBlock::new(field, solver),
            });
            channels_in = channels_out;
        }

        Self {
            conv1: conv3x3(3, width, 1, device),
            bn1: BatchNormConfig::new(width).init(device),
            stages,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            linear: LinearConfig::new(channels_in, num_classes).init(device),
            relu: Relu::new(),
        }
    }

    /// Images `[batch, 3, H, W]` to logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.relu.forward(self.bn1.forward(self.conv1.forward(images)));
        for stage in &self.stages {
            x = stage.ode.forward(stage.transition.forward(x));
        }
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

impl<B: Backend> ParameterInit for OdeResNet<B> {
    fn init_parameters(mut self) -> Self {
        self.conv1 = self.conv1.init_parameters();
        self.bn1 = self.bn1.init_parameters();
        self.stages = self.stages.init_parameters();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ode::IntegrationMethod;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_basic_block_downsamples() {
        let device = Default::default();
        let block = BasicBlock::<TestBackend>::new(4, 8, 2, &device);
        assert!(block.shortcut.is_some());

        let x = Tensor::<TestBackend, 4>::random([2, 4, 8, 8], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [2, 8, 4, 4]);
    }

    #[test]
    fn test_identity_shortcut_when_shape_kept() {
        let device = Default::default();
        let block = BasicBlock::<TestBackend>::new(4, 4, 1, &device);
        assert!(block.shortcut.is_none());
    }

    #[test]
    fn test_resnet_forward_shape() {
        let device = Default::default();
        let solver = SolverConfig::new(IntegrationMethod::Euler, 1).unwrap();
        let model = OdeResNet::<TestBackend>::new(10, 4, solver, &device);
        assert_eq!(model.stages.len(), 4);

        let images = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        assert_eq!(model.forward(images).dims(), [2, 10]);
        assert!(model.ode_blocks().all(|block| block.nfe() == 1));
    }
}
