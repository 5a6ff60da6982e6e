use crate::StepIntegrable;

/// Defines the right-hand side of an ODE `dy/dt = f(t, y)`.
///
/// The derivative shares the state's type, so solvers can combine stage
/// derivatives with [`StepIntegrable::step`].
pub trait Dynamics {
    type State: StepIntegrable;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Evaluates the derivative of `state` at time `t`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the derivative cannot be computed.
    fn derivative(&self, t: f64, state: &Self::State) -> Result<Self::State, Self::Error>;
}
