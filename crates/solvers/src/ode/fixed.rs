use strand_core::{Dynamics, Observer};

use super::{
    Action, Config, Error, Event, Progress, Solution, Status,
    tableau::{Evaluator, Tableau},
};

/// Integrates across `times` with a fixed-step explicit method.
///
/// Each grid interval is split into equal steps no larger than
/// `config.step_size`, or taken in one step when no size is set, so every
/// grid time is hit exactly.
pub(super) fn integrate<D, Obs>(
    eval: &mut Evaluator<'_, D>,
    tableau: &Tableau,
    y0: D::State,
    times: &[f64],
    config: &Config,
    observer: &mut Obs,
) -> Result<Solution<D::State>, Error>
where
    D: Dynamics,
    Obs: Observer<Event<D::State>, Action>,
{
    let mut progress = Progress::new(times[0], y0.clone());
    let mut y = y0;

    for interval in times.windows(2) {
        let (start, end) = (interval[0], interval[1]);
        let substeps = config.step_size.map_or(1, |h| substeps(end - start, h));
        let h = (end - start) / substeps as f64;

        for i in 0..substeps {
            let t = start + i as f64 * h;
            if progress.steps >= config.max_steps {
                return Err(Error::MaxStepsExceeded {
                    max_steps: config.max_steps,
                    t,
                });
            }

            let k1 = eval.derivative(t, &y)?;
            let (next, _) = tableau.step(eval, t, &y, h, k1)?;
            y = next;

            let t_next = if i + 1 == substeps {
                end
            } else {
                start + (i + 1) as f64 * h
            };
            if progress.accepted(t_next, h, &y, observer) {
                progress.output(t_next, y);
                return Ok(progress.finish(Status::StoppedByObserver, eval.evaluations));
            }
        }

        progress.output(end, y.clone());
    }

    Ok(progress.finish(Status::Complete, eval.evaluations))
}

/// Number of equal steps covering `span` with steps of at most `h`.
fn substeps(span: f64, h: f64) -> usize {
    // Tolerate round-off such as 0.3 / 0.1 = 2.9999999999999996.
    let ratio = span.abs() / h;
    let count = (ratio - 1e-9 * ratio.max(1.0)).ceil().max(1.0);
    count as usize
}
