use crate::Tensor;

/// Boxed error returned by custom backward rules.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A custom backward rule attached to a graph node.
///
/// A node created with [`Tensor::from_function`] does not record how its
/// value was computed. When a reverse-mode sweep reaches it, the sweep calls
/// [`Function::backward`] with the gradient flowing into the node and expects
/// one gradient per input, in the order the inputs were given.
///
/// The rule runs under the gradient mode of the sweep: with
/// `create_graph = true` any tensor operations it performs are recorded.
pub trait Function {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Maps the gradient of the node's output to gradients of its inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the gradient cannot be computed. The sweep wraps
    /// it in [`Error::Function`](crate::Error::Function).
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>, BoxError>;
}
