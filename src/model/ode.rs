//! Fixed-step ODE integration and the ODE block
//!
//! An ODE block replaces a residual stage: instead of `x + f(x)` it integrates
//! `dx/dt = f(x)` from `t = 0` to `t = 1` in `nt` equal steps and returns the
//! final state. Gradients are taken through the discretized trajectory by the
//! autodiff backend (discretize-then-optimize).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::{
    module::{Ignored, Module},
    tensor::{backend::Backend, Tensor},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::init::ParameterInit;
use crate::model::resnet::ResidualField;
use crate::model::sqnxt::SqueezeNextField;
use crate::utils::error::{AnodeError, Result};

/// Explicit Runge-Kutta scheme used by every ODE block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum IntegrationMethod {
    /// Forward Euler, one evaluation per step
    #[serde(rename = "Euler")]
    #[value(name = "Euler")]
    Euler,
    /// Explicit midpoint, two evaluations per step
    #[serde(rename = "RK2")]
    #[value(name = "RK2")]
    Rk2,
    /// Classical fourth-order Runge-Kutta, four evaluations per step
    #[serde(rename = "RK4")]
    #[value(name = "RK4")]
    Rk4,
}

impl IntegrationMethod {
    /// Velocity-field evaluations per integration step
    pub fn evals_per_step(&self) -> usize {
        match self {
            IntegrationMethod::Euler => 1,
            IntegrationMethod::Rk2 => 2,
            IntegrationMethod::Rk4 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntegrationMethod::Euler => "Euler",
            IntegrationMethod::Rk2 => "RK2",
            IntegrationMethod::Rk4 => "RK4",
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IntegrationMethod {
    type Err = AnodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "euler" => Ok(IntegrationMethod::Euler),
            "rk2" => Ok(IntegrationMethod::Rk2),
            "rk4" => Ok(IntegrationMethod::Rk4),
            _ => Err(AnodeError::InvalidConfiguration(format!(
                "unknown integration method '{}' (expected Euler, RK2 or RK4)",
                s
            ))),
        }
    }
}

/// Integration method and step count shared by all ODE blocks of a network.
///
/// Only constructible through [`SolverConfig::new`], so `nt >= 1` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverConfig {
    method: IntegrationMethod,
    nt: usize,
}

impl SolverConfig {
    pub fn new(method: IntegrationMethod, nt: usize) -> Result<Self> {
        if nt == 0 {
            return Err(AnodeError::InvalidConfiguration(
                "Nt must be at least 1".to_string(),
            ));
        }
        Ok(Self { method, nt })
    }

    /// Parse the method by name, as found in saved run metadata
    pub fn parse(method: &str, nt: usize) -> Result<Self> {
        Self::new(method.parse()?, nt)
    }

    pub fn method(&self) -> IntegrationMethod {
        self.method
    }

    pub fn nt(&self) -> usize {
        self.nt
    }

    pub fn step_size(&self) -> f64 {
        1.0 / self.nt as f64
    }

    /// Velocity-field evaluations for one solve over [0, 1]
    pub fn evals_per_solve(&self) -> usize {
        self.nt * self.method.evals_per_step()
    }
}

impl fmt::Display for SolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Nt = {})", self.method, self.nt)
    }
}

/// Integrate `dx/dt = field(x)` over [0, 1] starting from `x0`.
///
/// `field` is called exactly `solver.evals_per_solve()` times.
pub fn integrate<B, const D: usize, F>(
    mut field: F,
    x0: Tensor<B, D>,
    solver: &SolverConfig,
) -> Tensor<B, D>
where
    B: Backend,
    F: FnMut(Tensor<B, D>) -> Tensor<B, D>,
{
    let h = solver.step_size();
    let mut x = x0;

    for _ in 0..solver.nt {
        x = match solver.method {
            IntegrationMethod::Euler => {
                let k1 = field(x.clone());
                x + k1.mul_scalar(h)
            }
            IntegrationMethod::Rk2 => {
                let k1 = field(x.clone());
                let k2 = field(x.clone() + k1.mul_scalar(h / 2.0));
                x + k2.mul_scalar(h)
            }
            IntegrationMethod::Rk4 => {
                let k1 = field(x.clone());
                let k2 = field(x.clone() + k1.clone().mul_scalar(h / 2.0));
                let k3 = field(x.clone() + k2.clone().mul_scalar(h / 2.0));
                let k4 = field(x.clone() + k3.clone().mul_scalar(h));
                let increment = k1 + k2.mul_scalar(2.0) + k3.mul_scalar(2.0) + k4;
                x + increment.mul_scalar(h / 6.0)
            }
        };
    }

    x
}

/// Shared function-evaluation counter.
///
/// Clones share the count, so the inference copy of a model and the module
/// returned by an optimizer step report into the same counter.
#[derive(Debug, Clone, Default)]
pub struct NfeCounter(Arc<AtomicUsize>);

impl NfeCounter {
    fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Learned velocity field of an ODE block
#[derive(Module, Debug)]
pub enum VelocityField<B: Backend> {
    Residual(ResidualField<B>),
    SqueezeNext(SqueezeNextField<B>),
}

impl<B: Backend> VelocityField<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            VelocityField::Residual(field) => field.forward(x),
            VelocityField::SqueezeNext(field) => field.forward(x),
        }
    }
}

impl<B: Backend> ParameterInit for VelocityField<B> {
    fn init_parameters(self) -> Self {
        match self {
            VelocityField::Residual(field) => VelocityField::Residual(field.init_parameters()),
            VelocityField::SqueezeNext(field) => {
                VelocityField::SqueezeNext(field.init_parameters())
            }
        }
    }
}

/// A continuous-depth block: integrates its velocity field over [0, 1]
#[derive(Module, Debug)]
pub struct OdeBlock<B: Backend> {
    pub field: VelocityField<B>,
    solver: Ignored<SolverConfig>,
    nfe: Ignored<NfeCounter>,
}

impl<B: Backend> OdeBlock<B> {
    pub fn new(field: VelocityField<B>, solver: SolverConfig) -> Self {
        debug!("ODE block with {}", solver);
        Self {
            field,
            solver: Ignored(solver),
            nfe: Ignored(NfeCounter::default()),
        }
    }

    /// Output has the same shape as the input
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let counter = &self.nfe.0;
        integrate(
            |state| {
                counter.add(1);
                self.field.forward(state)
            },
            x,
            &self.solver.0,
        )
    }

    pub fn solver(&self) -> SolverConfig {
        self.solver.0
    }

    /// Replace the solver configuration. Never called from `forward`.
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = Ignored(solver);
        self
    }

    /// Velocity-field evaluations since construction or the last reset
    pub fn nfe(&self) -> usize {
        self.nfe.0.get()
    }

    pub fn reset_nfe(&self) {
        self.nfe.0.reset();
    }
}

impl<B: Backend> ParameterInit for OdeBlock<B> {
    fn init_parameters(mut self) -> Self {
        self.field = self.field.init_parameters();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    const METHODS: [IntegrationMethod; 3] = [
        IntegrationMethod::Euler,
        IntegrationMethod::Rk2,
        IntegrationMethod::Rk4,
    ];

    fn to_vec(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_zero_field_is_identity() {
        let device = Default::default();
        let x0 = Tensor::<TestBackend, 2>::random([3, 5], Distribution::Normal(0.0, 1.0), &device);
        let expected = to_vec(x0.clone());

        for method in METHODS {
            for nt in 1..=4 {
                let solver = SolverConfig::new(method, nt).unwrap();
                let out = integrate(|x: Tensor<TestBackend, 2>| x.zeros_like(), x0.clone(), &solver);
                assert_eq!(to_vec(out), expected, "{} with Nt = {}", method, nt);
            }
        }
    }

    #[test]
    fn test_field_call_count_matches_method() {
        let device = Default::default();
        let x0 = Tensor::<TestBackend, 2>::ones([1, 1], &device);

        for method in METHODS {
            for nt in 1..=3 {
                let solver = SolverConfig::new(method, nt).unwrap();
                let mut calls = 0;
                let _ = integrate(
                    |x: Tensor<TestBackend, 2>| {
                        calls += 1;
                        x
                    },
                    x0.clone(),
                    &solver,
                );
                assert_eq!(calls, nt * method.evals_per_step());
                assert_eq!(calls, solver.evals_per_solve());
            }
        }
    }

    #[test]
    fn test_exponential_growth_accuracy() {
        // dx/dt = x from x(0) = 1 gives x(1) = e
        let device = Default::default();
        let x0 = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32], [1, 1]), &device);
        let e = std::f32::consts::E;

        let error = |method, nt| {
            let solver = SolverConfig::new(method, nt).unwrap();
            let out = integrate(|x: Tensor<TestBackend, 2>| x, x0.clone(), &solver);
            (to_vec(out)[0] - e).abs()
        };

        // Euler with one step is exactly 1 + h
        assert!((error(IntegrationMethod::Euler, 1) - (e - 2.0)).abs() < 1e-6);
        // Midpoint with one step is 1 + h + h^2 / 2
        assert!((error(IntegrationMethod::Rk2, 1) - (e - 2.5)).abs() < 1e-6);
        assert!(error(IntegrationMethod::Rk4, 4) < 2e-4);
        assert!(error(IntegrationMethod::Rk4, 2) < error(IntegrationMethod::Rk2, 2));
        assert!(error(IntegrationMethod::Rk2, 2) < error(IntegrationMethod::Euler, 2));
    }

    #[test]
    fn test_zero_steps_rejected() {
        for method in METHODS {
            let err = SolverConfig::new(method, 0).unwrap_err();
            assert!(matches!(err, AnodeError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("Euler".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Euler);
        assert_eq!("RK2".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Rk2);
        assert_eq!("rk4".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Rk4);

        let err = "dopri5".parse::<IntegrationMethod>().unwrap_err();
        assert!(matches!(err, AnodeError::InvalidConfiguration(_)));
        assert!(SolverConfig::parse("Heun", 2).is_err());
    }

    #[test]
    fn test_method_names_round_trip_through_display() {
        for method in METHODS {
            assert_eq!(method.to_string().parse::<IntegrationMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_ode_block_counts_evaluations() {
        let device = Default::default();
        let field = VelocityField::Residual(ResidualField::<TestBackend>::new(4, &device));
        let x = Tensor::<TestBackend, 4>::random([2, 4, 6, 6], Distribution::Default, &device);

        for method in METHODS {
            let solver = SolverConfig::new(method, 3).unwrap();
            let block = OdeBlock::new(field.clone(), solver);
            assert_eq!(block.nfe(), 0);

            let out = block.forward(x.clone());
            assert_eq!(out.dims(), [2, 4, 6, 6]);
            assert_eq!(block.nfe(), 3 * method.evals_per_step());

            block.reset_nfe();
            assert_eq!(block.nfe(), 0);
        }
    }

    #[test]
    fn test_clones_share_counter() {
        let device = Default::default();
        let field = VelocityField::Residual(ResidualField::<TestBackend>::new(2, &device));
        let solver = SolverConfig::new(IntegrationMethod::Rk2, 2).unwrap();
        let block = OdeBlock::new(field, solver);
        let copy = block.clone();

        let x = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device);
        copy.forward(x);
        assert_eq!(block.nfe(), 4);
    }

    #[test]
    fn test_with_solver_changes_step_count() {
        let device = Default::default();
        let field = VelocityField::Residual(ResidualField::<TestBackend>::new(2, &device));
        let block = OdeBlock::new(field, SolverConfig::new(IntegrationMethod::Euler, 1).unwrap())
            .with_solver(SolverConfig::new(IntegrationMethod::Rk4, 2).unwrap());

        block.forward(Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device));
        assert_eq!(block.nfe(), 8);
        assert_eq!(block.solver().method(), IntegrationMethod::Rk4);
    }
}
