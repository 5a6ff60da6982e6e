//! Vector fields backed by a neural network.

use std::convert::Infallible;

use strand_autodiff::Tensor;
use strand_core::{Parameterized, VectorField};

use crate::nn::Module;

/// Autonomous field `f(t, x) = net(x)`.
#[derive(Debug, Clone)]
pub struct NeuralField<M> {
    net: M,
}

impl<M: Module> NeuralField<M> {
    #[must_use]
    pub fn new(net: M) -> Self {
        Self { net }
    }

    #[must_use]
    pub fn net(&self) -> &M {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut M {
        &mut self.net
    }
}

impl<M: Module> Parameterized for NeuralField<M> {
    fn parameters(&self) -> Vec<Tensor> {
        self.net.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.parameters_mut()
    }
}

impl<M: Module> VectorField for NeuralField<M> {
    type Error = Infallible;

    fn eval(&self, _t: &Tensor, x: &Tensor) -> Result<Tensor, Infallible> {
        Ok(self.net.forward(x))
    }
}

/// Depth-variant field `f(t, x) = net([x, t])`.
///
/// The time is appended as an extra input column, so `net` takes one more
/// input than the state has columns.
#[derive(Debug, Clone)]
pub struct DepthCatField<M> {
    net: M,
}

impl<M: Module> DepthCatField<M> {
    #[must_use]
    pub fn new(net: M) -> Self {
        Self { net }
    }

    #[must_use]
    pub fn net(&self) -> &M {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut M {
        &mut self.net
    }
}

impl<M: Module> Parameterized for DepthCatField<M> {
    fn parameters(&self) -> Vec<Tensor> {
        self.net.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.parameters_mut()
    }
}

impl<M: Module> VectorField for DepthCatField<M> {
    type Error = Infallible;

    fn eval(&self, t: &Tensor, x: &Tensor) -> Result<Tensor, Infallible> {
        let input = Tensor::concat_cols(&[x.clone(), t.broadcast_to(x.rows(), 1)]);
        Ok(self.net.forward(&input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;
    use strand_autodiff::grad;

    use crate::nn::Linear;

    #[test]
    fn neural_field_ignores_time() {
        let field = NeuralField::new(Linear::from_parts(
            array![[0.0, 1.0], [-1.0, 0.0]],
            array![[0.0, 0.0]],
        ));
        let x = Tensor::new(array![[1.0, 2.0], [3.0, 4.0]]);

        let early = field.eval(&Tensor::scalar(0.0), &x).unwrap();
        let late = field.eval(&Tensor::scalar(5.0), &x).unwrap();

        assert_eq!(early.value(), &array![[-2.0, 1.0], [-4.0, 3.0]]);
        assert_eq!(early.value(), late.value());
    }

    #[test]
    fn depth_cat_appends_time_column() {
        let field = DepthCatField::new(Linear::from_parts(array![[1.0], [10.0]], array![[0.0]]));
        let x = Tensor::new(array![[1.0], [2.0]]);

        let dx = field.eval(&Tensor::scalar(0.5), &x).unwrap();

        assert_eq!(dx.value(), &array![[6.0], [7.0]]);
    }

    #[test]
    fn depth_cat_gradient_reaches_time() {
        let field = DepthCatField::new(Linear::from_parts(array![[1.0], [3.0]], array![[0.0]]));
        let t = Tensor::scalar(0.2).to_variable();
        let x = Tensor::new(array![[1.0], [2.0]]);

        let out = field.eval(&t, &x).unwrap().sum();
        let dt = grad(&out, &[t.clone()], false).unwrap();

        assert_relative_eq!(dt[0].item(), 6.0);
    }

    #[test]
    fn parameters_delegate_to_net() {
        let net = Linear::from_parts(array![[1.0, 2.0]], array![[3.0, 4.0]]);
        let field = NeuralField::new(net.clone());

        assert_eq!(field.flat_parameters(), net.flat_parameters());
        assert_eq!(field.num_parameters(), 4);
    }
}
