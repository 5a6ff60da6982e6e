#![allow(dead_code)]

use std::f64::consts::PI;

use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use strand_autodiff::{Tensor, grad};
use strand_core::Parameterized;
use strand_models::nn::{Activation, Sequential, mlp};
use strand_solvers::ode;

/// Two interleaving half circles with Gaussian noise.
///
/// The first `n / 2` samples have label 0, the rest label 1.
pub fn moons(n: usize, noise: f64, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise).expect("noise is finite and non-negative");

    let outer = n / 2;
    let inner = n - outer;
    let angle = |i: usize, count: usize| {
        if count > 1 {
            PI * i as f64 / (count - 1) as f64
        } else {
            0.0
        }
    };

    let mut x = Array2::zeros((n, 2));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let (a, b, label) = if i < outer {
            let theta = angle(i, outer);
            (theta.cos(), theta.sin(), 0)
        } else {
            let theta = angle(i - outer, inner);
            (1.0 - theta.cos(), 0.5 - theta.sin(), 1)
        };
        x[[i, 0]] = a + normal.sample(&mut rng);
        x[[i, 1]] = b + normal.sample(&mut rng);
        labels.push(label);
    }
    (x, labels)
}

/// Deterministic multilayer perceptron.
pub fn net(sizes: &[usize], activation: Activation, seed: u64) -> Sequential {
    let mut rng = StdRng::seed_from_u64(seed);
    mlp(sizes, activation, &mut rng)
}

/// Deterministic batch with entries drawn from a standard normal.
pub fn batch(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("unit variance is valid");
    Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng))
}

pub fn dopri5(tol: f64) -> ode::Config {
    ode::Config::with_method(ode::Method::Dopri5 {
        abs_tol: tol,
        rel_tol: tol,
    })
}

/// Gradients of `loss` with respect to `x` followed by every parameter of
/// `model`, flattened into one vector.
pub fn flat_gradients<P: Parameterized>(loss: &Tensor, x: &Tensor, model: &P) -> Vec<f64> {
    let mut inputs = vec![x.clone()];
    inputs.extend(model.parameters());

    grad(loss, &inputs, false)
        .expect("loss is a scalar")
        .iter()
        .flat_map(Tensor::to_vec)
        .collect()
}

/// Asserts `‖a − b‖∞ ≤ tol`.
pub fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "gradient lengths differ");
    let worst = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max);
    assert!(worst <= tol, "max abs difference {worst:e} exceeds {tol:e}");
}
