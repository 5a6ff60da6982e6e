//! Continuous-depth neural models for the Strand framework.
//!
//! A [`NeuralDe`] integrates a learned [`VectorField`] over a depth span and
//! returns the final state. Gradients of anything computed from that state
//! come from one of two sensitivity modes, selectable at runtime:
//!
//! - [`SensitivityMode::Autograd`] — differentiate the recorded graph of the
//!   forward solve
//! - [`SensitivityMode::Adjoint`] — solve the adjoint ODE backward in time
//!   ([`adjoint`]), storing only the states at the output times; the default
//!
//! Fields are built from the [`nn`] blocks directly ([`field`]) or through
//! energy functions that impose physical structure ([`energy`]).
//!
//! [`VectorField`]: strand_core::VectorField

pub mod adjoint;
pub mod energy;
pub mod field;
pub mod neural_de;
pub mod nn;

pub use neural_de::{NeuralDe, SensitivityMode, Trajectory};
