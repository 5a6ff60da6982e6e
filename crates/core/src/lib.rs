//! Core contracts for the Strand framework.
//!
//! This crate defines the shared abstractions that solvers and models build on:
//!
//! - [`Parameterized`] — exposes trainable tensors, individually or as one
//!   flat, order-stable vector
//! - [`VectorField`] — a differentiable map from `(t, x)` to `dx/dt`
//! - [`Dynamics`] — what an ODE solver integrates
//! - [`StepIntegrable`] — state types a Runge–Kutta scheme can combine
//! - [`FieldDynamics`] — adapts a [`VectorField`] into [`Dynamics`] over tensors
//! - [`Observer`] — receives solver events and optionally returns control actions

mod dynamics;
mod error;
mod field;
mod observer;
mod params;
mod step;

pub use dynamics::Dynamics;
pub use error::Error;
pub use field::{FieldDynamics, VectorField};
pub use observer::Observer;
pub use params::Parameterized;
pub use step::StepIntegrable;
