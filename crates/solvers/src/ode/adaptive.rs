use std::iter;

use strand_autodiff::no_grad;
use strand_core::{Dynamics, Observer, StepIntegrable};
use tracing::trace;

use super::{
    Action, Config, Error, Event, Progress, Solution, Status,
    tableau::{DOPRI5, DOPRI5_ERROR, Evaluator},
};

const ORDER: f64 = 5.0;
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

/// Error-controlled tolerances.
#[derive(Debug, Clone, Copy)]
pub(super) struct Tolerances {
    pub abs: f64,
    pub rel: f64,
}

/// Integrates across `times` with adaptive Dormand–Prince 5(4).
///
/// Steps that would pass a grid time are shortened to land on it. The step
/// size controller reads values only, so under recording the graph contains
/// the stage arithmetic of accepted steps and nothing of the control logic.
pub(super) fn integrate<D, Obs>(
    eval: &mut Evaluator<'_, D>,
    y0: D::State,
    times: &[f64],
    tol: Tolerances,
    config: &Config,
    observer: &mut Obs,
) -> Result<Solution<D::State>, Error>
where
    D: Dynamics,
    Obs: Observer<Event<D::State>, Action>,
{
    let t0 = times[0];
    let direction = (times[times.len() - 1] - t0).signum();

    let mut progress = Progress::new(t0, y0.clone());
    let mut t = t0;
    let mut y = y0;
    let mut k1 = eval.derivative(t, &y)?;
    let mut h = match config.step_size {
        Some(h) => h * direction,
        None => no_grad(|| initial_step(eval, t, &y, &k1, direction, tol))?,
    };

    for &target in &times[1..] {
        while (target - t) * direction > 0.0 {
            if progress.steps + progress.rejected >= config.max_steps {
                return Err(Error::MaxStepsExceeded {
                    max_steps: config.max_steps,
                    t,
                });
            }

            let remaining = target - t;
            let truncated = remaining.abs() <= 1.01 * h.abs();
            let h_try = if truncated { remaining } else { h };

            let (next, k) = DOPRI5.step(eval, t, &y, h_try, k1.clone())?;
            let k7 = eval.derivative(t + h_try, &next)?;

            let ratio = if next.all_finite() && k7.all_finite() {
                no_grad(|| {
                    let stages: Vec<(f64, &D::State)> = DOPRI5_ERROR
                        .iter()
                        .copied()
                        .zip(k.iter().chain(iter::once(&k7)))
                        .collect();
                    <D::State as StepIntegrable>::combine(h_try, &stages).scaled_rms(
                        &[&y, &next],
                        tol.abs,
                        tol.rel,
                    )
                })
            } else {
                f64::INFINITY
            };

            if ratio <= 1.0 {
                let grown = h_try * step_factor(ratio, true);
                h = if truncated {
                    grown.abs().max(h.abs()) * direction
                } else {
                    grown
                };
                t = if truncated { target } else { t + h_try };
                y = next;
                k1 = k7;

                if progress.accepted(t, h_try, &y, observer) {
                    progress.output(t, y);
                    return Ok(progress.finish(Status::StoppedByObserver, eval.evaluations));
                }
            } else {
                progress.rejected += 1;
                h = h_try * step_factor(ratio, false);
                trace!(t, h = h_try, ratio, "rejected step");

                if h.abs() < min_step(t) {
                    return Err(Error::StepSizeTooSmall { h, t });
                }
            }
        }

        progress.output(target, y.clone());
    }

    Ok(progress.finish(Status::Complete, eval.evaluations))
}

/// Scales the step after an error ratio of `ratio`.
///
/// Accepted steps never shrink.
fn step_factor(ratio: f64, accepted: bool) -> f64 {
    if ratio == 0.0 {
        return MAX_FACTOR;
    }
    if !ratio.is_finite() {
        return MIN_FACTOR;
    }
    let floor = if accepted { 1.0 } else { MIN_FACTOR };
    (SAFETY * ratio.powf(-1.0 / ORDER)).clamp(floor, MAX_FACTOR)
}

fn min_step(t: f64) -> f64 {
    16.0 * f64::EPSILON * t.abs().max(1.0)
}

/// Selects a first step from the scale of the state and its derivatives.
///
/// Follows Hairer, Nørsett & Wanner, *Solving ODEs I*, §II.4.
fn initial_step<D: Dynamics>(
    eval: &mut Evaluator<'_, D>,
    t0: f64,
    y0: &D::State,
    f0: &D::State,
    direction: f64,
    tol: Tolerances,
) -> Result<f64, Error> {
    let d0 = y0.scaled_rms(&[y0], tol.abs, tol.rel);
    let d1 = f0.scaled_rms(&[y0], tol.abs, tol.rel);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };

    let y1 = y0.step(h0 * direction, &[(1.0, f0)]);
    let f1 = eval.derivative(t0 + h0 * direction, &y1)?;
    let difference = <D::State as StepIntegrable>::combine(1.0, &[(1.0, &f1), (-1.0, f0)]);
    let d2 = difference.scaled_rms(&[y0], tol.abs, tol.rel) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / ORDER)
    };

    Ok((100.0 * h0).min(h1) * direction)
}
