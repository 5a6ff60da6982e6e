/// Event emitted by the ODE solver.
///
/// Step 0 is the initial state before any integration and has `h = 0`.
/// Steps 1..N are emitted after each accepted step.
#[derive(Debug, Clone)]
pub struct Event<S> {
    /// The accepted step number (0 for the initial state).
    pub step: usize,

    /// Time at the end of the step.
    pub t: f64,

    /// Signed size of the step just taken.
    pub h: f64,

    /// State at `t`.
    pub state: S,
}
