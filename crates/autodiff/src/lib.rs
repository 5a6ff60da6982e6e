//! Reverse-mode automatic differentiation for the Strand framework.
//!
//! This crate provides the differentiation engine that continuous-depth
//! models are built on:
//!
//! - [`Tensor`] — a rank-2 `f64` array plus an optional node in a dynamic
//!   computation graph
//! - [`grad`] and [`vjp`] — reverse-mode sweeps from an output back to a set
//!   of inputs, optionally recording the sweep itself so gradients can be
//!   differentiated again (Hessians, third-order terms)
//! - [`no_grad`] and [`enable_grad`] — thread-local control over whether
//!   operations record a graph
//! - [`Function`] — a custom backward rule attached to a graph node, used to
//!   substitute a hand-written gradient for the recorded one
//!
//! Rows are batch samples and columns are features. Scalars are 1×1 tensors.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use strand_autodiff::{Tensor, grad};
//!
//! let x = Tensor::variable(array![[1.0, 2.0]]);
//! let y = x.mul(&x).sum();
//!
//! let dx = grad(&y, &[x.clone()], false).unwrap();
//! assert_eq!(dx[0].value(), &array![[2.0, 4.0]]);
//! ```

mod backward;
mod error;
mod function;
mod linalg;
mod mode;
mod op;
mod tensor;

pub use backward::{grad, vjp};
pub use error::Error;
pub use function::{BoxError, Function};
pub use mode::{enable_grad, is_grad_enabled, no_grad};
pub use tensor::{NodeId, Tensor};
