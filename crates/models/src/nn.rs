//! Minimal neural-network building blocks.
//!
//! Every block is a [`Module`]: a [`Parameterized`] function from a batch
//! (one sample per row) to a batch, built from recorded tensor operations.

mod activation;
mod linear;
mod loss;
mod sequential;

pub use activation::Activation;
pub use linear::Linear;
pub use loss::{cross_entropy, mse};
pub use sequential::{Layer, Sequential, mlp};

use strand_autodiff::Tensor;
use strand_core::Parameterized;

/// A differentiable, parameterized map over batches.
pub trait Module: Parameterized {
    /// Applies the module to `x`.
    fn forward(&self, x: &Tensor) -> Tensor;
}
