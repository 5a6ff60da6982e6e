use rand::Rng;
use strand_autodiff::Tensor;
use strand_core::Parameterized;

use super::{Activation, Linear, Module};

/// A layer of a [`Sequential`] network.
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Activation(Activation),
}

impl From<Linear> for Layer {
    fn from(layer: Linear) -> Self {
        Layer::Linear(layer)
    }
}

impl From<Activation> for Layer {
    fn from(activation: Activation) -> Self {
        Layer::Activation(activation)
    }
}

/// Layers applied in order.
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Appends a layer.
    #[must_use]
    pub fn push(mut self, layer: impl Into<Layer>) -> Self {
        self.layers.push(layer.into());
        self
    }

    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

impl Parameterized for Sequential {
    fn parameters(&self) -> Vec<Tensor> {
        self.layers
            .iter()
            .flat_map(|layer| match layer {
                Layer::Linear(linear) => linear.parameters(),
                Layer::Activation(_) => Vec::new(),
            })
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(|layer| match layer {
                Layer::Linear(linear) => linear.parameters_mut(),
                Layer::Activation(_) => Vec::new(),
            })
            .collect()
    }
}

impl Module for Sequential {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.layers
            .iter()
            .fold(x.clone(), |h, layer| match layer {
                Layer::Linear(linear) => linear.forward(&h),
                Layer::Activation(activation) => activation.apply(&h),
            })
    }
}

/// Builds a multilayer perceptron with `activation` between linear layers.
///
/// `sizes = [2, 64, 2]` gives `Linear(2, 64) → activation → Linear(64, 2)`.
///
/// # Panics
///
/// Panics if fewer than two sizes are given or any input size is zero.
pub fn mlp<R: Rng + ?Sized>(sizes: &[usize], activation: Activation, rng: &mut R) -> Sequential {
    assert!(sizes.len() >= 2, "an MLP needs input and output sizes");

    let mut net = Sequential::default();
    for (i, pair) in sizes.windows(2).enumerate() {
        if i > 0 {
            net = net.push(activation);
        }
        net = net.push(Linear::new(pair[0], pair[1], rng));
    }
    net
}
