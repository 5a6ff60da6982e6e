//! Continuous-depth models.

use std::rc::Rc;

use strand_autodiff::{BoxError, Function, Tensor, no_grad};
use strand_core::{FieldDynamics, Parameterized, VectorField};
use strand_solvers::ode;
use thiserror::Error;
use tracing::debug;

use crate::adjoint;

/// How gradients of a [`NeuralDe`] output are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensitivityMode {
    /// Differentiates the graph recorded by the forward solve.
    Autograd,

    /// Solves the adjoint system backward in time.
    ///
    /// The forward solve records no graph.
    #[default]
    Adjoint,
}

/// Configuration for a [`NeuralDe`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Solver used for the forward pass.
    pub solver: ode::Config,

    /// Solver used for the adjoint backward pass, `solver` when unset.
    pub adjoint_solver: Option<ode::Config>,

    /// Integration interval of [`NeuralDe::forward`].
    pub s_span: [f64; 2],
}

/// Errors that can occur when validating a [`Config`].
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("solver: {0}")]
    Solver(#[source] ode::ConfigError),

    #[error("adjoint solver: {0}")]
    AdjointSolver(#[source] ode::ConfigError),

    #[error("s_span [{start}, {end}] must be finite with distinct ends")]
    Span { start: f64, end: f64 },
}

/// Errors raised by a [`NeuralDe`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("input batch has no samples")]
    EmptyBatch,

    #[error("integration failed")]
    Integration(#[from] ode::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solver: ode::Config::default(),
            adjoint_solver: None,
            s_span: [0.0, 1.0],
        }
    }
}

impl Config {
    /// Validates both solver configs and the integration interval.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.validate().map_err(ConfigError::Solver)?;
        if let Some(adjoint) = &self.adjoint_solver {
            adjoint.validate().map_err(ConfigError::AdjointSolver)?;
        }

        let [start, end] = self.s_span;
        if !start.is_finite() || !end.is_finite() || start == end {
            return Err(ConfigError::Span { start, end });
        }
        Ok(())
    }

    fn backward_solver(&self) -> ode::Config {
        self.adjoint_solver.unwrap_or(self.solver)
    }
}

/// States of a batch at a sequence of times.
///
/// All states are stacked into one `(len · batch) × dim` tensor, so that a
/// single graph node carries the gradient of the whole trajectory.
#[derive(Debug, Clone)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Tensor,
    batch: usize,
}

impl Trajectory {
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Returns the stacked states.
    #[must_use]
    pub fn states(&self) -> &Tensor {
        &self.states
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Returns the batch at `times()[index]`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn state(&self, index: usize) -> Tensor {
        assert!(index < self.len(), "trajectory index out of bounds");
        self.states.slice_rows(index * self.batch, self.batch)
    }

    /// Returns the batch at the last time.
    ///
    /// # Panics
    ///
    /// Panics if the trajectory is empty.
    #[must_use]
    pub fn last(&self) -> Tensor {
        assert!(!self.is_empty(), "trajectory has no states");
        self.state(self.len() - 1)
    }
}

/// A neural differential equation `dx/dt = f(t, x; θ)`.
///
/// The output of [`forward`](NeuralDe::forward) is the solution at the end of
/// `s_span`. Gradients flow to the input and every parameter of the field,
/// computed according to the current [`SensitivityMode`].
///
/// # Example
///
/// ```ignore
/// let field = NeuralField::new(mlp(&[2, 64, 2], Activation::Tanh, &mut rng));
/// let mut model = NeuralDe::new(field, Config::default())?;
/// model.set_sensitivity(SensitivityMode::Autograd);
///
/// let loss = cross_entropy(&model.forward(&x)?, &labels);
/// let grads = grad(&loss, &model.parameters(), false)?;
/// ```
#[derive(Debug, Clone)]
pub struct NeuralDe<F> {
    field: F,
    config: Config,
    sensitivity: SensitivityMode,
}

impl<F: VectorField + Clone + 'static> NeuralDe<F> {
    /// Creates a model in [`SensitivityMode::Adjoint`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is invalid.
    pub fn new(field: F, config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            field,
            config,
            sensitivity: SensitivityMode::default(),
        })
    }

    /// Sets the sensitivity mode.
    #[must_use]
    pub fn with_sensitivity(mut self, mode: SensitivityMode) -> Self {
        self.sensitivity = mode;
        self
    }

    /// Solves from `x` over `s_span` and returns the final state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBatch`] for an input without rows, or
    /// [`Error::Integration`] if the solve fails.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor, Error> {
        Ok(self.trajectory(x, &self.config.s_span)?.last())
    }

    /// Solves from `x` at `times[0]` and returns the state at every time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBatch`] for an input without rows, or
    /// [`Error::Integration`] if the grid is invalid or the solve fails.
    pub fn trajectory(&self, x: &Tensor, times: &[f64]) -> Result<Trajectory, Error> {
        if x.rows() == 0 {
            return Err(Error::EmptyBatch);
        }

        let dynamics = FieldDynamics::new(&self.field);
        let states = match self.sensitivity {
            SensitivityMode::Autograd => {
                let solution = ode::solve_unobserved(&dynamics, x.clone(), times, &self.config.solver)?;
                self.log_solve(&solution);
                Tensor::concat_rows(&solution.states)
            }
            SensitivityMode::Adjoint => {
                let solution = no_grad(|| {
                    ode::solve_unobserved(&dynamics, x.detach(), times, &self.config.solver)
                })?;
                self.log_solve(&solution);
                self.attach_adjoint(x, solution)
            }
        };

        Ok(Trajectory {
            times: times.to_vec(),
            states,
            batch: x.rows(),
        })
    }

    /// Wraps the stacked states of an unrecorded solve in a node whose
    /// backward rule runs the adjoint system.
    fn attach_adjoint(&self, x: &Tensor, solution: ode::Solution<Tensor>) -> Tensor {
        let value = Tensor::concat_rows(&solution.states).value().clone();

        let params = self.field.parameters();
        let mut inputs = Vec::with_capacity(params.len() + 1);
        inputs.push(x.clone());
        inputs.extend(params);

        let rule = AdjointFunction {
            field: self.field.clone(),
            num_params: self.field.num_parameters(),
            times: solution.times,
            states: solution.states,
            batch: x.rows(),
            config: self.config.backward_solver(),
        };
        Tensor::from_function(value, inputs, Rc::new(rule))
    }

    fn log_solve(&self, solution: &ode::Solution<Tensor>) {
        debug!(
            mode = ?self.sensitivity,
            batch = solution.states[0].rows(),
            steps = solution.steps,
            rejected = solution.rejected,
            evaluations = solution.evaluations,
            "neural de solve"
        );
    }

    #[must_use]
    pub fn sensitivity(&self) -> SensitivityMode {
        self.sensitivity
    }

    /// Switches how later outputs are differentiated.
    ///
    /// Tensors already produced keep the rule they were produced with.
    pub fn set_sensitivity(&mut self, mode: SensitivityMode) {
        self.sensitivity = mode;
    }

    #[must_use]
    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut F {
        &mut self.field
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<F: VectorField> Parameterized for NeuralDe<F> {
    fn parameters(&self) -> Vec<Tensor> {
        self.field.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.field.parameters_mut()
    }
}

/// Backward rule of an adjoint-mode trajectory.
///
/// Holds a snapshot of the field and the states at every output time. Its
/// inputs are the initial state followed by the field parameters.
struct AdjointFunction<F> {
    field: F,
    num_params: usize,
    times: Vec<f64>,
    states: Vec<Tensor>,
    batch: usize,
    config: ode::Config,
}

impl<F: VectorField> Function for AdjointFunction<F> {
    fn name(&self) -> &'static str {
        "neural_de_adjoint"
    }

    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>, BoxError> {
        let output_grads: Vec<Tensor> = (0..self.times.len())
            .map(|i| grad_output.slice_rows(i * self.batch, self.batch).detach())
            .collect();

        let grads = adjoint::backward(
            &self.field,
            &self.times,
            &self.states,
            &output_grads,
            self.num_params,
            &self.config,
        )?;

        let mut input_grads = Vec::with_capacity(grads.params.len() + 1);
        input_grads.push(grads.state);
        input_grads.extend(grads.params);
        Ok(input_grads)
    }
}
