use ndarray::Array2;
use strand_autodiff::Tensor;

use crate::Error;

/// A type that owns trainable tensors.
///
/// The flat representation concatenates every tensor in [`parameters`]
/// order, each in row-major order. Implementations must keep that order
/// stable for the lifetime of the value.
///
/// [`parameters`]: Parameterized::parameters
pub trait Parameterized {
    /// Returns the trainable tensors.
    fn parameters(&self) -> Vec<Tensor>;

    /// Returns mutable handles to the trainable tensors, in [`parameters`]
    /// order.
    ///
    /// [`parameters`]: Parameterized::parameters
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Returns the total number of trainable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(Tensor::len).sum()
    }

    /// Returns all trainable scalars as one vector.
    fn flat_parameters(&self) -> Vec<f64> {
        self.parameters()
            .iter()
            .flat_map(|param| param.value().iter().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Replaces every trainable tensor with a new leaf built from `values`.
    ///
    /// Graphs recorded before the call keep referring to the old tensors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterCount`] if `values` does not hold exactly
    /// [`num_parameters`](Parameterized::num_parameters) elements.
    fn set_flat_parameters(&mut self, values: &[f64]) -> Result<(), Error> {
        let expected = self.num_parameters();
        if values.len() != expected {
            return Err(Error::ParameterCount {
                expected,
                found: values.len(),
            });
        }

        let mut offset = 0;
        for param in self.parameters_mut() {
            let (rows, cols) = param.shape();
            let chunk = &values[offset..offset + rows * cols];
            *param = Tensor::variable(Array2::from_shape_fn((rows, cols), |(i, j)| {
                chunk[i * cols + j]
            }));
            offset += rows * cols;
        }

        Ok(())
    }
}
