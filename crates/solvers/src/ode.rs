//! Explicit Runge–Kutta integration over a time grid.
//!
//! [`solve`] integrates [`Dynamics`] from the first grid time through every
//! later one and returns the state at each. The grid may run forward or
//! backward in time; the solver never special-cases direction.
//!
//! # Methods
//!
//! - [`Method::Euler`], [`Method::Midpoint`], [`Method::Rk4`] — fixed-step,
//!   one step per grid interval unless [`Config::step_size`] is set
//! - [`Method::Dopri5`] — adaptive Dormand–Prince 5(4) with first-same-as-last
//!   stage reuse and automatic initial step selection
//!
//! Stage arithmetic goes through [`StepIntegrable`], so differentiable states
//! record the whole solve when gradient recording is enabled.
//!
//! # Example
//!
//! ```ignore
//! use strand_solvers::ode;
//!
//! let solution = ode::solve_unobserved(&dynamics, y0, &[0.0, 0.5, 1.0], &ode::Config::default())?;
//!
//! for (t, y) in solution.times.iter().zip(&solution.states) {
//!     println!("t={t}: {y:?}");
//! }
//! ```

mod action;
mod adaptive;
mod config;
mod error;
mod event;
mod fixed;
mod solution;
mod tableau;

pub use action::Action;
pub use config::{Config, ConfigError, Method};
pub use error::Error;
pub use event::Event;
pub use solution::{Solution, Status};

use strand_core::{Dynamics, Observer, StepIntegrable};
use tracing::{debug, trace};

use self::{adaptive::Tolerances, tableau::Evaluator};

/// Integrates `dynamics` from `y0` at `times[0]` through every later time.
///
/// # Observer
///
/// The observer receives an [`Event`] for the initial state and after each
/// accepted step, and may return [`Action::StopEarly`]. A stopped solution
/// ends with the state where integration stopped, which need not be a grid
/// time.
///
/// # Errors
///
/// Returns an error if the config or grid is invalid, the step budget runs
/// out, the adaptive controller cannot meet the tolerances, or the dynamics
/// fail.
pub fn solve<D, Obs>(
    dynamics: &D,
    y0: D::State,
    times: &[f64],
    config: &Config,
    mut observer: Obs,
) -> Result<Solution<D::State>, Error>
where
    D: Dynamics,
    Obs: Observer<Event<D::State>, Action>,
{
    config.validate()?;
    validate_grid(times)?;

    let start = Event {
        step: 0,
        t: times[0],
        h: 0.0,
        state: y0.clone(),
    };
    if let Some(Action::StopEarly) = observer.observe(&start) {
        return Ok(Progress::new(times[0], y0).finish(Status::StoppedByObserver, 0));
    }

    let mut eval = Evaluator::new(dynamics);
    let solution = match config.method {
        Method::Euler => {
            fixed::integrate(&mut eval, &tableau::EULER, y0, times, config, &mut observer)
        }
        Method::Midpoint => {
            fixed::integrate(&mut eval, &tableau::MIDPOINT, y0, times, config, &mut observer)
        }
        Method::Rk4 => fixed::integrate(&mut eval, &tableau::RK4, y0, times, config, &mut observer),
        Method::Dopri5 { abs_tol, rel_tol } => adaptive::integrate(
            &mut eval,
            y0,
            times,
            Tolerances {
                abs: abs_tol,
                rel: rel_tol,
            },
            config,
            &mut observer,
        ),
    }?;

    debug!(
        method = ?config.method,
        t0 = times[0],
        t1 = solution.times.last().copied(),
        steps = solution.steps,
        rejected = solution.rejected,
        evaluations = solution.evaluations,
        status = ?solution.status,
        "ode solve finished"
    );

    Ok(solution)
}

/// Integrates `dynamics` without observation.
///
/// This is a convenience wrapper around [`solve`] that discards events.
///
/// # Errors
///
/// Returns an error under the same conditions as [`solve`].
pub fn solve_unobserved<D: Dynamics>(
    dynamics: &D,
    y0: D::State,
    times: &[f64],
    config: &Config,
) -> Result<Solution<D::State>, Error> {
    solve(dynamics, y0, times, config, ())
}

fn validate_grid(times: &[f64]) -> Result<(), Error> {
    if times.len() < 2 {
        return Err(Error::GridTooShort { len: times.len() });
    }
    if let Some(index) = times.iter().position(|t| !t.is_finite()) {
        return Err(Error::NonFiniteTime { index });
    }

    let direction = (times[1] - times[0]).signum();
    for (index, pair) in times.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        if delta == 0.0 || delta.signum() != direction {
            return Err(Error::NonMonotonicGrid { index: index + 1 });
        }
    }
    Ok(())
}

/// Collects grid outputs and step counts while integrating.
struct Progress<S> {
    times: Vec<f64>,
    states: Vec<S>,
    steps: usize,
    rejected: usize,
}

impl<S: StepIntegrable> Progress<S> {
    fn new(t0: f64, y0: S) -> Self {
        Self {
            times: vec![t0],
            states: vec![y0],
            steps: 0,
            rejected: 0,
        }
    }

    /// Counts an accepted step ending at `(t, state)` and reports it.
    ///
    /// Returns `true` if the observer asked to stop.
    fn accepted<Obs>(&mut self, t: f64, h: f64, state: &S, observer: &mut Obs) -> bool
    where
        Obs: Observer<Event<S>, Action>,
    {
        self.steps += 1;
        trace!(step = self.steps, t, h, "accepted step");

        let event = Event {
            step: self.steps,
            t,
            h,
            state: state.clone(),
        };
        matches!(Observer::observe(observer, &event), Some(Action::StopEarly))
    }

    fn output(&mut self, t: f64, state: S) {
        self.times.push(t);
        self.states.push(state);
    }

    fn finish(self, status: Status, evaluations: usize) -> Solution<S> {
        Solution {
            status,
            times: self.times,
            states: self.states,
            steps: self.steps,
            rejected: self.rejected,
            evaluations,
        }
    }
}
