//! Backend selection
//!
//! `cuda` picks the CUDA backend, otherwise NdArray on the CPU. Training wraps
//! it in autodiff with balanced checkpointing: activations inside the ODE
//! solves are recomputed on the backward pass instead of being stored for the
//! whole trajectory.

use burn::backend::autodiff::checkpoint::strategy::BalancedCheckpointing;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(not(any(feature = "cuda", feature = "ndarray")))]
compile_error!("enable the `cuda` or `ndarray` (`cpu`) feature to pick a backend");

/// Backend the trainer differentiates through
pub type TrainingBackend = Autodiff<DefaultBackend, BalancedCheckpointing>;

pub type Device = <DefaultBackend as Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}

pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else {
        "NdArray (CPU)"
    }
}
