use strand_autodiff::Tensor;

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Tanh,
    Softplus,
    Sigmoid,
}

impl Activation {
    #[must_use]
    pub fn apply(&self, x: &Tensor) -> Tensor {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Softplus => x.softplus(),
            Activation::Sigmoid => x.sigmoid(),
        }
    }
}
