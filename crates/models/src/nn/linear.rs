use ndarray::Array2;
use rand::Rng;
use strand_autodiff::Tensor;
use strand_core::Parameterized;

use super::Module;

/// Affine layer `y = x W + b`.
///
/// `W` is `inputs × outputs` and `b` is `1 × outputs`, broadcast over rows.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Creates a layer with weights and biases drawn uniformly from
    /// `±1/√inputs`.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` is zero.
    pub fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        assert!(inputs > 0, "linear layer needs at least one input");
        let bound = 1.0 / (inputs as f64).sqrt();

        let weight = Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-bound..=bound));
        let bias = Array2::from_shape_fn((1, outputs), |_| rng.gen_range(-bound..=bound));

        Self::from_parts(weight, bias)
    }

    /// Creates a layer from explicit weights and biases.
    ///
    /// # Panics
    ///
    /// Panics if `bias` is not `1 × weight.ncols()`.
    #[must_use]
    pub fn from_parts(weight: Array2<f64>, bias: Array2<f64>) -> Self {
        assert_eq!(
            bias.dim(),
            (1, weight.ncols()),
            "bias must be a single row matching the weight columns"
        );
        Self {
            weight: Tensor::variable(weight),
            bias: Tensor::variable(bias),
        }
    }

    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[must_use]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[must_use]
    pub fn inputs(&self) -> usize {
        self.weight.rows()
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.weight.cols()
    }
}

impl Parameterized for Linear {
    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight, &mut self.bias]
    }
}

impl Module for Linear {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.matmul(&self.weight).add(&self.bias)
    }
}
