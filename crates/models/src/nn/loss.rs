use ndarray::{Array2, Axis};
use strand_autodiff::Tensor;

/// Mean negative log-likelihood of `targets` under a softmax over `logits`.
///
/// `logits` is `samples × classes` and `targets[i]` the class of row `i`.
/// Each row is shifted by its maximum before exponentiating.
///
/// # Panics
///
/// Panics if `targets` does not have one entry per row or names a class
/// outside `logits`.
#[must_use]
pub fn cross_entropy(logits: &Tensor, targets: &[usize]) -> Tensor {
    let (rows, cols) = logits.shape();
    assert_eq!(targets.len(), rows, "cross_entropy: one target per row");
    assert!(
        targets.iter().all(|&class| class < cols),
        "cross_entropy: target class out of range"
    );

    let row_max = logits
        .value()
        .map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |m, &v| m.max(v)))
        .insert_axis(Axis(1));
    let one_hot = Array2::from_shape_fn((rows, cols), |(i, j)| {
        if targets[i] == j { 1.0 } else { 0.0 }
    });

    let shifted = logits.sub(&Tensor::new(row_max));
    let log_normalizer = shifted.exp().sum_cols().ln();
    let picked = shifted.mul(&Tensor::new(one_hot)).sum_cols();

    log_normalizer.sub(&picked).mean()
}

/// Mean squared error.
#[must_use]
pub fn mse(prediction: &Tensor, target: &Tensor) -> Tensor {
    prediction.sub(target).square().mean()
}
