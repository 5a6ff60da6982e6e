mod common;

use approx::assert_relative_eq;
use ndarray::array;
use strand_autodiff::{Tensor, no_grad};
use strand_core::Parameterized;
use strand_models::{
    NeuralDe, SensitivityMode,
    energy::Hamiltonian,
    field::NeuralField,
    neural_de::{Config, Error},
    nn::{Activation, Linear, Module},
};
use strand_solvers::ode;

use common::{batch, dopri5, moons, net};

#[test]
fn switching_mode_keeps_forward_output() {
    let (x, _) = moons(128, 0.4, 20);
    let x = Tensor::new(x);
    let field = NeuralField::new(net(&[2, 32, 2], Activation::Tanh, 21));
    let mut model = NeuralDe::new(field, Config::default())
        .unwrap()
        .with_sensitivity(SensitivityMode::Autograd);

    let autograd = model.forward(&x).unwrap();
    model.set_sensitivity(SensitivityMode::Adjoint);
    let adjoint = model.forward(&x).unwrap();

    assert_eq!(model.sensitivity(), SensitivityMode::Adjoint);
    assert_eq!(autograd.value(), adjoint.value());
}

#[test]
fn parameter_round_trip_reproduces_output() {
    let x = Tensor::new(batch(5, 2, 22));
    let field = NeuralField::new(net(&[2, 8, 2], Activation::Softplus, 23));
    let mut model = NeuralDe::new(field, Config::default()).unwrap();

    let before = model.forward(&x).unwrap();
    let params = model.flat_parameters();
    model.set_flat_parameters(&params).unwrap();
    let after = model.forward(&x).unwrap();

    assert_eq!(model.flat_parameters(), params);
    assert_eq!(before.value(), after.value());
}

#[test]
fn wrong_parameter_count_is_rejected() {
    let field = NeuralField::new(net(&[2, 4, 2], Activation::Tanh, 24));
    let mut model = NeuralDe::new(field, Config::default()).unwrap();
    let count = model.num_parameters();

    let result = model.set_flat_parameters(&vec![0.0; count + 1]);

    assert!(matches!(
        result,
        Err(strand_core::Error::ParameterCount { expected, found })
            if expected == count && found == count + 1
    ));
}

#[test]
fn hamiltonian_flow_conserves_energy() {
    // H = ½(q² + p²) through a fixed quadratic network.
    let squares = Linear::from_parts(array![[1.0, 0.0], [0.0, 1.0]], array![[0.0, 0.0]]);
    let field = Hamiltonian::new(QuadraticEnergy(squares));
    let config = Config {
        solver: dopri5(1e-9),
        s_span: [0.0, std::f64::consts::FRAC_PI_2],
        ..Config::default()
    };
    let model = NeuralDe::new(field, config).unwrap();
    let x = Tensor::new(array![[1.0, 0.0]]);

    let y = no_grad(|| model.forward(&x)).unwrap();

    // dq/dt = p, dp/dt = -q rotates (1, 0) to (0, -1) after a quarter period.
    assert_relative_eq!(y.value()[[0, 0]], 0.0, epsilon = 1e-7);
    assert_relative_eq!(y.value()[[0, 1]], -1.0, epsilon = 1e-7);
}

#[test]
fn solver_failures_surface_as_integration_errors() {
    let field = NeuralField::new(net(&[2, 4, 2], Activation::Tanh, 25));
    let config = Config {
        solver: ode::Config {
            max_steps: 1,
            ..dopri5(1e-12)
        },
        ..Config::default()
    };
    let model = NeuralDe::new(field, config).unwrap();

    let result = model.forward(&Tensor::new(batch(2, 2, 26)));

    assert!(matches!(
        result,
        Err(Error::Integration(ode::Error::MaxStepsExceeded { .. }))
    ));
}

#[test]
fn invalid_time_grid_is_rejected() {
    let field = NeuralField::new(net(&[2, 4, 2], Activation::Tanh, 27));
    let model = NeuralDe::new(field, Config::default()).unwrap();
    let x = Tensor::new(batch(2, 2, 28));

    let result = model.trajectory(&x, &[0.0, 1.0, 0.5]);

    assert!(matches!(
        result,
        Err(Error::Integration(ode::Error::NonMonotonicGrid { index: 2 }))
    ));
}

// --- Test fixtures ---

/// `g(x) = ½ Σ (x W)²`.
#[derive(Debug, Clone)]
struct QuadraticEnergy(Linear);

impl Parameterized for QuadraticEnergy {
    fn parameters(&self) -> Vec<Tensor> {
        self.0.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.0.parameters_mut()
    }
}

impl Module for QuadraticEnergy {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.0.forward(x).square().sum_cols().scale(0.5)
    }
}
