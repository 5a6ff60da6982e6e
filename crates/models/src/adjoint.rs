//! Adjoint sensitivity analysis.
//!
//! Gradients of a loss with respect to the initial state, the parameters and
//! the output times of an ODE solve are obtained by integrating an augmented
//! system backward in time instead of differentiating through the solver.
//! Memory is independent of the number of solver steps: only the states at
//! output times are needed.
//!
//! For `dz/dt = f(t, z; θ)` and adjoint `a = dL/dz`, the augmented system is
//!
//! ```text
//! dz/dt     =  f(t, z)
//! da/dt     = -aᵀ ∂f/∂z
//! da_θ/dt   = -aᵀ ∂f/∂θ
//! da_t/dt   = -aᵀ ∂f/∂t
//! ```
//!
//! and each evaluation takes one vector–Jacobian product with cotangent `-a`.

use std::error::Error as StdError;

use strand_autodiff::{BoxError, Tensor, enable_grad, no_grad, vjp};
use strand_core::{Dynamics, Parameterized, StepIntegrable, VectorField};
use strand_solvers::ode;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the adjoint backward pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error("backward integration failed")]
    Integration(#[from] ode::Error),

    #[error("field has {found} parameters but {expected} were recorded")]
    ParameterCount { expected: usize, found: usize },

    #[error("expected one state per output time ({expected}), got {found}")]
    StateCount { expected: usize, found: usize },

    #[error("expected one output gradient per output time ({expected}), got {found}")]
    GradientCount { expected: usize, found: usize },

    #[error("output gradient {index} has shape {found:?} but the state has shape {expected:?}")]
    GradientShape {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("vector field error: {0}")]
    Field(#[source] BoxError),

    #[error(transparent)]
    Autodiff(#[from] strand_autodiff::Error),
}

/// Gradients produced by [`backward`].
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Gradient with respect to the state at the first output time.
    pub state: Tensor,

    /// Gradients with respect to each parameter tensor, in
    /// [`parameters`](strand_core::Parameterized::parameters) order.
    pub params: Vec<Tensor>,

    /// Gradients with respect to each output time.
    pub times: Vec<f64>,
}

/// State, adjoint, parameter adjoints and time adjoint, integrated jointly.
#[derive(Debug, Clone)]
pub struct AugmentedState {
    pub state: Tensor,
    pub adjoint: Tensor,
    pub params: Vec<Tensor>,
    pub time: Tensor,
}

impl AugmentedState {
    fn components(&self) -> impl Iterator<Item = &Tensor> {
        [&self.state, &self.adjoint]
            .into_iter()
            .chain(&self.params)
            .chain([&self.time])
    }

    fn map_stages<'a>(
        stages: &[(f64, &'a Self)],
        component: impl Fn(&'a Self) -> &'a Tensor,
    ) -> Vec<(f64, &'a Tensor)> {
        stages
            .iter()
            .map(|&(weight, aug)| (weight, component(aug)))
            .collect()
    }
}

impl StepIntegrable for AugmentedState {
    fn combine(delta: f64, stages: &[(f64, &Self)]) -> Self {
        let combine = |component: fn(&Self) -> &Tensor| {
            Tensor::combine(delta, &Self::map_stages(stages, component))
        };
        let param_count = stages.first().map_or(0, |(_, aug)| aug.params.len());

        Self {
            state: combine(|aug| &aug.state),
            adjoint: combine(|aug| &aug.adjoint),
            params: (0..param_count)
                .map(|j| Tensor::combine(delta, &Self::map_stages(stages, |aug| &aug.params[j])))
                .collect(),
            time: combine(|aug| &aug.time),
        }
    }

    fn step(&self, delta: f64, stages: &[(f64, &Self)]) -> Self {
        let increment = Self::combine(delta, stages);
        Self {
            state: self.state.add(&increment.state),
            adjoint: self.adjoint.add(&increment.adjoint),
            params: self
                .params
                .iter()
                .zip(&increment.params)
                .map(|(param, delta)| param.add(delta))
                .collect(),
            time: self.time.add(&increment.time),
        }
    }

    /// Returns the largest per-component norm.
    fn scaled_rms(&self, references: &[&Self], abs_tol: f64, rel_tol: f64) -> f64 {
        let mut reference_components: Vec<_> =
            references.iter().map(|aug| aug.components()).collect();

        self.components()
            .map(|value| {
                let refs: Vec<&Tensor> = reference_components
                    .iter_mut()
                    .filter_map(Iterator::next)
                    .collect();
                value.scaled_rms(&refs, abs_tol, rel_tol)
            })
            .fold(0.0, f64::max)
    }

    fn all_finite(&self) -> bool {
        self.components().all(Tensor::all_finite)
    }
}

/// Backward-in-time dynamics of an [`AugmentedState`].
pub struct AugmentedDynamics<'a, F> {
    field: &'a F,
    params: Vec<Tensor>,
}

impl<'a, F: VectorField> AugmentedDynamics<'a, F> {
    #[must_use]
    pub fn new(field: &'a F) -> Self {
        Self {
            field,
            params: field.parameters(),
        }
    }
}

impl<F: VectorField> Dynamics for AugmentedDynamics<'_, F> {
    type State = AugmentedState;
    type Error = strand_core::Error;

    fn derivative(&self, t: f64, aug: &AugmentedState) -> Result<AugmentedState, Self::Error> {
        enable_grad(|| -> Result<AugmentedState, Self::Error> {
            let time = Tensor::scalar(t).to_variable();
            let state = aug.state.to_variable();

            let f = self
                .field
                .eval(&time, &state)
                .map_err(|err| strand_core::Error::Field(Box::new(err)))?;
            if f.shape() != state.shape() {
                return Err(strand_core::Error::Shape {
                    expected: state.shape(),
                    found: f.shape(),
                });
            }

            let mut inputs = Vec::with_capacity(self.params.len() + 2);
            inputs.push(time);
            inputs.push(state);
            inputs.extend(self.params.iter().cloned());

            let mut grads = vjp(&f, &aug.adjoint.neg(), &inputs, false)
                .map_err(|err| strand_core::Error::Field(Box::new(err)))?;
            let params = grads.split_off(2);
            let [time_grad, state_grad]: [Tensor; 2] = grads
                .try_into()
                .map_err(|_| strand_core::Error::Field("vjp returned too few gradients".into()))?;

            Ok(AugmentedState {
                state: f.detach(),
                adjoint: state_grad,
                params,
                time: time_grad,
            })
        })
    }
}

/// Computes gradients by integrating the augmented system from the last
/// output time back to the first.
///
/// `states[i]` is the forward state at `times[i]` and `output_grads[i]` the
/// gradient of the loss with respect to it. At each interior time the
/// reconstructed state is reset to the stored forward state and that time's
/// output gradient is added to the adjoint.
///
/// `expected_params` is the number of scalar parameters the field had when
/// `states` were produced.
///
/// # Errors
///
/// Returns an error if the inputs do not line up, the field's parameter count
/// changed, the field fails, or the backward integration fails.
pub fn backward<F: VectorField>(
    field: &F,
    times: &[f64],
    states: &[Tensor],
    output_grads: &[Tensor],
    expected_params: usize,
    config: &ode::Config,
) -> Result<Gradients, Error> {
    validate(field, times, states, output_grads, expected_params)?;

    let dynamics = AugmentedDynamics::new(field);
    let last = times.len() - 1;

    no_grad(|| -> Result<Gradients, Error> {
        let mut aug = AugmentedState {
            state: states[last].detach(),
            adjoint: output_grads[last].detach(),
            params: dynamics
                .params
                .iter()
                .map(|param| Tensor::zeros(param.rows(), param.cols()))
                .collect(),
            time: Tensor::zeros(1, 1),
        };
        let mut time_grads = vec![0.0; times.len()];

        for i in (1..=last).rev() {
            let rate = output_rate(field, times[i], &states[i], &output_grads[i])?;
            time_grads[i] = rate;
            aug.time = aug.time.add_scalar(-rate);

            let solution = ode::solve_unobserved(&dynamics, aug, &[times[i], times[i - 1]], config)?;
            debug!(
                from = times[i],
                to = times[i - 1],
                steps = solution.steps,
                rejected = solution.rejected,
                evaluations = solution.evaluations,
                "adjoint interval integrated"
            );

            aug = solution.into_last_state();
            aug.state = states[i - 1].detach();
            aug.adjoint = aug.adjoint.add(&output_grads[i - 1].detach());
        }
        time_grads[0] = aug.time.item();

        Ok(Gradients {
            state: aug.adjoint,
            params: aug.params,
            times: time_grads,
        })
    })
}

fn validate<F: VectorField>(
    field: &F,
    times: &[f64],
    states: &[Tensor],
    output_grads: &[Tensor],
    expected_params: usize,
) -> Result<(), Error> {
    if times.len() < 2 {
        return Err(ode::Error::GridTooShort { len: times.len() }.into());
    }
    if states.len() != times.len() {
        return Err(Error::StateCount {
            expected: times.len(),
            found: states.len(),
        });
    }
    if output_grads.len() != times.len() {
        return Err(Error::GradientCount {
            expected: times.len(),
            found: output_grads.len(),
        });
    }
    if let Some((index, (state, grad))) = states
        .iter()
        .zip(output_grads)
        .enumerate()
        .find(|(_, (state, grad))| state.shape() != grad.shape())
    {
        return Err(Error::GradientShape {
            index,
            expected: state.shape(),
            found: grad.shape(),
        });
    }

    let found = field.num_parameters();
    if found != expected_params {
        return Err(Error::ParameterCount {
            expected: expected_params,
            found,
        });
    }
    Ok(())
}

/// Returns `gᵀ f(t, z)`, the rate at which the loss changes with the output
/// time `t`.
fn output_rate<F: VectorField>(field: &F, t: f64, state: &Tensor, grad: &Tensor) -> Result<f64, Error> {
    let f = field
        .eval(&Tensor::scalar(t), &state.detach())
        .map_err(|err| Error::Field(boxed(err)))?;
    if f.shape() != state.shape() {
        return Err(Error::Field(boxed(strand_core::Error::Shape {
            expected: state.shape(),
            found: f.shape(),
        })));
    }
    Ok((f.value() * grad.value()).sum())
}

fn boxed<E: StdError + Send + Sync + 'static>(err: E) -> BoxError {
    Box::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use approx::assert_relative_eq;
    use ndarray::array;

    // --- Test fixtures ---

    /// `dz/dt = a·z`, so `z(T) = z0·exp(a(T − t0))`.
    #[derive(Debug, Clone)]
    struct Decay {
        rate: Tensor,
    }

    impl Decay {
        fn new(rate: f64) -> Self {
            Self {
                rate: Tensor::variable(array![[rate]]),
            }
        }
    }

    impl Parameterized for Decay {
        fn parameters(&self) -> Vec<Tensor> {
            vec![self.rate.clone()]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            vec![&mut self.rate]
        }
    }

    impl VectorField for Decay {
        type Error = Infallible;

        fn eval(&self, _t: &Tensor, x: &Tensor) -> Result<Tensor, Infallible> {
            Ok(x.mul(&self.rate))
        }
    }

    /// `dz/dt = t`, so `z(T) = z0 + (T² − t0²)/2`.
    #[derive(Debug, Clone)]
    struct Ramp;

    impl Parameterized for Ramp {
        fn parameters(&self) -> Vec<Tensor> {
            Vec::new()
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            Vec::new()
        }
    }

    impl VectorField for Ramp {
        type Error = Infallible;

        fn eval(&self, t: &Tensor, x: &Tensor) -> Result<Tensor, Infallible> {
            Ok(t.broadcast_to(x.rows(), x.cols()))
        }
    }

    fn tight() -> ode::Config {
        ode::Config::with_method(ode::Method::Dopri5 {
            abs_tol: 1e-10,
            rel_tol: 1e-10,
        })
    }

    // --- Tests ---

    #[test]
    fn exponential_decay_gradients() {
        let (a, z0, t1) = (-0.7, 1.5, 2.0);
        let field = Decay::new(a);
        let z1 = z0 * (a * t1).exp();

        // L = z(T)
        let grads = backward(
            &field,
            &[0.0, t1],
            &[Tensor::new(array![[z0]]), Tensor::new(array![[z1]])],
            &[Tensor::zeros(1, 1), Tensor::ones(1, 1)],
            1,
            &tight(),
        )
        .unwrap();

        assert_relative_eq!(grads.state.item(), (a * t1).exp(), epsilon = 1e-7);
        assert_relative_eq!(grads.params[0].item(), t1 * z1, epsilon = 1e-7);
        assert_relative_eq!(grads.times[1], a * z1, epsilon = 1e-7);
        assert_relative_eq!(grads.times[0], -a * z1, epsilon = 1e-7);
    }

    #[test]
    fn interior_output_gradients_accumulate() {
        let (a, z0) = (0.3, 2.0);
        let field = Decay::new(a);
        let times = [0.0, 0.5, 1.0];
        let states: Vec<Tensor> = times
            .iter()
            .map(|t| Tensor::new(array![[z0 * (a * t).exp()]]))
            .collect();

        // L = z(0.5) + z(1.0)
        let grads = backward(
            &field,
            &times,
            &states,
            &[Tensor::zeros(1, 1), Tensor::ones(1, 1), Tensor::ones(1, 1)],
            1,
            &tight(),
        )
        .unwrap();

        let expected_state = (a * 0.5).exp() + a.exp();
        let expected_rate = 0.5 * z0 * (a * 0.5).exp() + z0 * a.exp();
        assert_relative_eq!(grads.state.item(), expected_state, epsilon = 1e-7);
        assert_relative_eq!(grads.params[0].item(), expected_rate, epsilon = 1e-7);
    }

    #[test]
    fn time_dependent_field() {
        let field = Ramp;
        let states = [Tensor::new(array![[0.0, 1.0]]), Tensor::new(array![[0.5, 1.5]])];

        // L = Σ z(T)
        let grads = backward(
            &field,
            &[0.0, 1.0],
            &states,
            &[Tensor::zeros(1, 2), Tensor::ones(1, 2)],
            0,
            &tight(),
        )
        .unwrap();

        assert_eq!(grads.state.value(), &array![[1.0, 1.0]]);
        assert!(grads.params.is_empty());
        assert_relative_eq!(grads.times[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(grads.times[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let field = Decay::new(1.0);
        let times = [0.0, 1.0];
        let states = [Tensor::zeros(2, 1), Tensor::zeros(2, 1)];
        let config = tight();

        let result = backward(&field, &times, &states[..1], &states, 1, &config);
        assert!(matches!(result, Err(Error::StateCount { expected: 2, found: 1 })));

        let result = backward(&field, &times, &states, &states[..1], 1, &config);
        assert!(matches!(result, Err(Error::GradientCount { expected: 2, found: 1 })));

        let grads = [Tensor::zeros(2, 1), Tensor::zeros(1, 1)];
        let result = backward(&field, &times, &states, &grads, 1, &config);
        assert!(matches!(result, Err(Error::GradientShape { index: 1, .. })));

        let result = backward(&field, &times, &states, &states, 3, &config);
        assert!(matches!(
            result,
            Err(Error::ParameterCount {
                expected: 3,
                found: 1
            })
        ));
    }

    #[test]
    fn integration_failure_propagates() {
        let field = Decay::new(1.0);
        let config = ode::Config {
            max_steps: 1,
            ..tight()
        };

        let result = backward(
            &field,
            &[0.0, 1.0],
            &[Tensor::ones(1, 1), Tensor::ones(1, 1)],
            &[Tensor::zeros(1, 1), Tensor::ones(1, 1)],
            1,
            &config,
        );

        assert!(matches!(
            result,
            Err(Error::Integration(ode::Error::MaxStepsExceeded { .. }))
        ));
    }

    #[test]
    fn augmented_state_steps_every_component() {
        let aug = AugmentedState {
            state: Tensor::new(array![[1.0]]),
            adjoint: Tensor::new(array![[2.0]]),
            params: vec![Tensor::new(array![[3.0, 4.0]])],
            time: Tensor::new(array![[5.0]]),
        };

        let next = aug.step(0.5, &[(2.0, &aug)]);

        assert_eq!(next.state.item(), 2.0);
        assert_eq!(next.adjoint.item(), 4.0);
        assert_eq!(next.params[0].value(), &array![[6.0, 8.0]]);
        assert_eq!(next.time.item(), 10.0);
        assert_relative_eq!(aug.scaled_rms(&[&aug], 0.0, 1.0), 1.0);
    }

    #[test]
    fn error_norm_pairs_each_component_with_its_reference() {
        let error = AugmentedState {
            state: Tensor::new(array![[1.0]]),
            adjoint: Tensor::new(array![[1.0]]),
            params: vec![Tensor::new(array![[1.0]]), Tensor::new(array![[4.0]])],
            time: Tensor::new(array![[1.0]]),
        };
        let reference = AugmentedState {
            params: vec![Tensor::new(array![[1.0]]), Tensor::new(array![[2.0]])],
            ..error.clone()
        };

        assert_relative_eq!(error.scaled_rms(&[&reference], 0.0, 1.0), 2.0);
        assert_relative_eq!(error.scaled_rms(&[&reference, &error], 0.0, 1.0), 1.0);
    }
}
