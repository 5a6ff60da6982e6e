//! Vector fields derived from a learned scalar function.
//!
//! Each field wraps a network `g` whose output is summed to a scalar and
//! differentiated with respect to the state:
//!
//! - [`Stable`] follows the negative gradient, `dx/dt = -∇g(x)`
//! - [`Hamiltonian`] treats `g` as an energy `H(q, p)` and rotates its
//!   gradient, `dq/dt = ∂H/∂p`, `dp/dt = -∂H/∂q`
//! - [`Lagrangian`] treats `g` as `L(q, q̇)` and solves the Euler–Lagrange
//!   equations for `q̈`
//!
//! All three are time-invariant and record the differentiation itself, so
//! their parameters receive gradients in both sensitivity modes.

use std::slice;

use strand_autodiff::{Tensor, enable_grad, grad};
use strand_core::{Parameterized, VectorField};
use thiserror::Error;

use crate::nn::Module;

/// Errors raised while evaluating an energy-based field.
#[derive(Debug, Error)]
pub enum Error {
    #[error("state width {0} cannot be split into two equal halves")]
    OddDimension(usize),

    #[error(transparent)]
    Autodiff(#[from] strand_autodiff::Error),
}

/// Gradient-descent field `dx/dt = -∇ₓ Σg(x)`.
#[derive(Debug, Clone)]
pub struct Stable<M> {
    net: M,
}

impl<M: Module> Stable<M> {
    #[must_use]
    pub fn new(net: M) -> Self {
        Self { net }
    }

    #[must_use]
    pub fn net(&self) -> &M {
        &self.net
    }
}

impl<M: Module> Parameterized for Stable<M> {
    fn parameters(&self) -> Vec<Tensor> {
        self.net.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.parameters_mut()
    }
}

impl<M: Module> VectorField for Stable<M> {
    type Error = Error;

    fn eval(&self, _t: &Tensor, x: &Tensor) -> Result<Tensor, Error> {
        enable_grad(|| -> Result<Tensor, Error> {
            let x = differentiable(x);
            let dg = state_gradient(&self.net, &x)?;
            Ok(dg.neg())
        })
    }
}

/// Hamiltonian field over `x = [q, p]`.
///
/// Returns `[∂H/∂p, -∂H/∂q]` where `H = Σg(x)`.
#[derive(Debug, Clone)]
pub struct Hamiltonian<M> {
    net: M,
}

impl<M: Module> Hamiltonian<M> {
    #[must_use]
    pub fn new(net: M) -> Self {
        Self { net }
    }

    #[must_use]
    pub fn net(&self) -> &M {
        &self.net
    }
}

impl<M: Module> Parameterized for Hamiltonian<M> {
    fn parameters(&self) -> Vec<Tensor> {
        self.net.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.parameters_mut()
    }
}

impl<M: Module> VectorField for Hamiltonian<M> {
    type Error = Error;

    fn eval(&self, _t: &Tensor, x: &Tensor) -> Result<Tensor, Error> {
        let half = half_width(x)?;
        enable_grad(|| -> Result<Tensor, Error> {
            let x = differentiable(x);
            let dh = state_gradient(&self.net, &x)?;
            let dq = dh.slice_cols(0, half);
            let dp = dh.slice_cols(half, half);
            Ok(Tensor::concat_cols(&[dp, dq.neg()]))
        })
    }
}

/// Lagrangian field over `x = [q, q̇]`.
///
/// Solves `q̈ = H_{q̇q̇}⁺ (∂L/∂q − H_{q̇q} q̇)` for each sample, where `H` is
/// the Hessian of `L = Σg` and `⁺` the pseudoinverse. A singular `H_{q̇q̇}`
/// yields the least-squares solution without error.
///
/// Samples are processed one at a time, with `2n` reverse-mode sweeps per
/// sample for the Hessian.
#[derive(Debug, Clone)]
pub struct Lagrangian<M> {
    net: M,
}

impl<M: Module> Lagrangian<M> {
    #[must_use]
    pub fn new(net: M) -> Self {
        Self { net }
    }

    #[must_use]
    pub fn net(&self) -> &M {
        &self.net
    }

    /// Returns `[q̇, q̈]` for a single `1 × 2n` sample.
    fn accelerate(&self, sample: &Tensor, half: usize) -> Result<Tensor, Error> {
        let jacobian = state_gradient(&self.net, sample)?;

        let hessian_rows = (0..2 * half)
            .map(|k| {
                let partial = jacobian.slice_cols(k, 1).sum();
                grad(&partial, slice::from_ref(sample), true).map(|mut g| g.swap_remove(0))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let hessian = Tensor::concat_rows(&hessian_rows);

        let velocity = sample.slice_cols(half, half);
        let force = jacobian.slice_cols(0, half).t();
        let coupling = hessian.slice(half, half, 0, half).matmul(&velocity.t());
        let mass = hessian.slice(half, half, half, half);

        let acceleration = mass.pinv().matmul(&force.sub(&coupling)).t();
        Ok(Tensor::concat_cols(&[velocity, acceleration]))
    }
}

impl<M: Module> Parameterized for Lagrangian<M> {
    fn parameters(&self) -> Vec<Tensor> {
        self.net.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.parameters_mut()
    }
}

impl<M: Module> VectorField for Lagrangian<M> {
    type Error = Error;

    fn eval(&self, _t: &Tensor, x: &Tensor) -> Result<Tensor, Error> {
        let half = half_width(x)?;
        enable_grad(|| -> Result<Tensor, Error> {
            let x = differentiable(x);
            let rows = (0..x.rows())
                .map(|i| self.accelerate(&x.slice_rows(i, 1), half))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Tensor::concat_rows(&rows))
        })
    }
}

/// Returns `x` itself when it already takes part in a graph, otherwise a new
/// leaf with its value.
fn differentiable(x: &Tensor) -> Tensor {
    if x.requires_grad() {
        x.clone()
    } else {
        x.to_variable()
    }
}

/// Computes `∇ₓ Σnet(x)`, recording the sweep.
fn state_gradient<M: Module>(net: &M, x: &Tensor) -> Result<Tensor, Error> {
    let total = net.forward(x).sum();
    let mut grads = grad(&total, slice::from_ref(x), true)?;
    Ok(grads.swap_remove(0))
}

fn half_width(x: &Tensor) -> Result<usize, Error> {
    let width = x.cols();
    if width % 2 == 0 {
        Ok(width / 2)
    } else {
        Err(Error::OddDimension(width))
    }
}
