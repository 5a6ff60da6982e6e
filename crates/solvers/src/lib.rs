//! Numerical solvers for the Strand framework.
//!
//! # Solvers
//!
//! - [`ode`] — explicit Runge–Kutta integration of [`Dynamics`] over a time
//!   grid, with fixed-step and adaptive Dormand–Prince methods
//!
//! [`Dynamics`]: strand_core::Dynamics

pub mod ode;
