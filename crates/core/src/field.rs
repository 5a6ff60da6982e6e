use strand_autodiff::{Tensor, is_grad_enabled};

use crate::{Dynamics, Error, Parameterized};

/// A differentiable vector field `dx/dt = f(t, x)`.
///
/// `t` is a 1×1 tensor and `x` a batch with one sample per row. The result
/// must have the shape of `x`. Evaluation is a pure function of `t`, `x` and
/// the current parameters, and must be built from recorded tensor operations
/// so that gradients flow to `t`, `x` and every tensor in
/// [`Parameterized::parameters`].
pub trait VectorField: Parameterized {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Evaluates the field.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the field cannot be evaluated for `x`.
    fn eval(&self, t: &Tensor, x: &Tensor) -> Result<Tensor, Self::Error>;
}

/// Adapts a [`VectorField`] into solver [`Dynamics`] over tensor states.
///
/// When gradient recording is disabled the derivative is detached, so fields
/// that differentiate internally do not leak graphs into an unrecorded solve.
#[derive(Debug)]
pub struct FieldDynamics<'a, F> {
    field: &'a F,
}

impl<'a, F: VectorField> FieldDynamics<'a, F> {
    #[must_use]
    pub fn new(field: &'a F) -> Self {
        Self { field }
    }
}

impl<F: VectorField> Dynamics for FieldDynamics<'_, F> {
    type State = Tensor;
    type Error = Error;

    fn derivative(&self, t: f64, state: &Tensor) -> Result<Tensor, Error> {
        let dx = self
            .field
            .eval(&Tensor::scalar(t), state)
            .map_err(Error::field)?;

        if dx.shape() != state.shape() {
            return Err(Error::Shape {
                expected: state.shape(),
                found: dx.shape(),
            });
        }

        Ok(if is_grad_enabled() { dx } else { dx.detach() })
    }
}
