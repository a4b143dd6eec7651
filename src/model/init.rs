//! Parameter initialization traversal
//!
//! Every convolution weight is drawn Xavier-uniform with gain √2 and its bias
//! zeroed; every batch-norm scale is set to one and its shift to zero. Composite
//! modules implement [`ParameterInit`] by forwarding to their children.

use burn::{
    module::Param,
    nn::{conv::Conv2d, BatchNorm},
    tensor::{backend::Backend, Distribution, Tensor},
};

/// Gain used for every convolution (the ReLU gain)
pub const XAVIER_GAIN: f64 = std::f64::consts::SQRT_2;

/// Re-initialize the parameters of a module and all of its sub-modules
pub trait ParameterInit {
    fn init_parameters(self) -> Self;
}

impl<M: ParameterInit> ParameterInit for Option<M> {
    fn init_parameters(self) -> Self {
        self.map(ParameterInit::init_parameters)
    }
}

impl<M: ParameterInit> ParameterInit for Vec<M> {
    fn init_parameters(self) -> Self {
        self.into_iter().map(ParameterInit::init_parameters).collect()
    }
}

/// Half-width of the Xavier-uniform interval
pub fn xavier_uniform_bound(fan_in: usize, fan_out: usize, gain: f64) -> f64 {
    gain * (6.0 / (fan_in + fan_out) as f64).sqrt()
}

impl<B: Backend> ParameterInit for Conv2d<B> {
    fn init_parameters(mut self) -> Self {
        let weight = self.weight.val();
        let device = weight.device();
        let [channels_out, channels_in, kernel_h, kernel_w] = weight.dims();
        let receptive_field = kernel_h * kernel_w;

        let bound = xavier_uniform_bound(
            channels_in * receptive_field,
            channels_out * receptive_field,
            XAVIER_GAIN,
        );
        self.weight = Param::from_tensor(Tensor::random(
            [channels_out, channels_in, kernel_h, kernel_w],
            Distribution::Uniform(-bound, bound),
            &device,
        ));
        self.bias = self
            .bias
            .map(|bias| Param::from_tensor(bias.val().zeros_like()));
        self
    }
}

impl<B: Backend> ParameterInit for BatchNorm<B, 2> {
    fn init_parameters(mut self) -> Self {
        self.gamma = Param::from_tensor(self.gamma.val().ones_like());
        self.beta = Param::from_tensor(self.beta.val().zeros_like());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::{conv::Conv2dConfig, BatchNormConfig};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_xavier_bound() {
        // 3x3 conv, 16 -> 32 channels
        let bound = xavier_uniform_bound(16 * 9, 32 * 9, XAVIER_GAIN);
        let expected = 2.0f64.sqrt() * (6.0 / 432.0f64).sqrt();
        assert!((bound - expected).abs() < 1e-12);
    }

    #[test]
    fn test_conv_weights_within_bound_and_bias_zero() {
        let device = Default::default();
        let conv = Conv2dConfig::new([4, 8], [3, 3])
            .init::<TestBackend>(&device)
            .init_parameters();

        let bound = xavier_uniform_bound(4 * 9, 8 * 9, XAVIER_GAIN) as f32;
        let weights = conv.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(weights.len(), 8 * 4 * 9);
        assert!(weights.iter().all(|w| w.abs() <= bound));

        let bias = conv
            .bias
            .as_ref()
            .map(|b| b.val().into_data().to_vec::<f32>().unwrap())
            .unwrap();
        assert!(bias.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn test_batch_norm_identity_affine() {
        let device = Default::default();
        let bn = BatchNormConfig::new(6)
            .init::<TestBackend, 2>(&device)
            .init_parameters();

        let gamma = bn.gamma.val().into_data().to_vec::<f32>().unwrap();
        let beta = bn.beta.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(gamma, vec![1.0; 6]);
        assert_eq!(beta, vec![0.0; 6]);
    }
}
