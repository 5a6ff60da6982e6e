/// Indicates how the solver terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Reached the last point of the time grid.
    Complete,

    /// Stopped early due to an observer action.
    StoppedByObserver,
}

/// The result of an ODE solve.
#[derive(Debug, Clone)]
pub struct Solution<S> {
    /// How the solver terminated.
    pub status: Status,

    /// Grid times that were reached, starting with the initial time.
    ///
    /// A solution stopped by an observer ends at the time where integration
    /// stopped instead.
    pub times: Vec<f64>,

    /// States at each of `times`, never empty.
    pub states: Vec<S>,

    /// Number of accepted steps.
    pub steps: usize,

    /// Number of rejected steps (always zero for fixed-step methods).
    pub rejected: usize,

    /// Number of derivative evaluations.
    pub evaluations: usize,
}

impl<S> Solution<S> {
    /// Returns the state at the last time reached.
    #[must_use]
    pub fn last_state(&self) -> &S {
        &self.states[self.states.len() - 1]
    }

    /// Consumes the solution, returning the state at the last time reached.
    #[must_use]
    pub fn into_last_state(mut self) -> S {
        self.states.swap_remove(self.states.len() - 1)
    }
}
