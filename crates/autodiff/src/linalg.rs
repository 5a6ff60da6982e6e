use nalgebra::DMatrix;
use ndarray::Array2;

/// Singular values below `RCOND * σ_max` are treated as zero.
const RCOND: f64 = 1e-15;

/// Moore–Penrose pseudoinverse via SVD.
///
/// Rank-deficient inputs fall back to the least-squares inverse without any
/// signal to the caller. Non-finite inputs yield a NaN-filled result.
pub(crate) fn pinv(a: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = a.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((cols, rows));
    }
    if !a.iter().all(|v| v.is_finite()) {
        return Array2::from_elem((cols, rows), f64::NAN);
    }

    let matrix = DMatrix::from_row_iterator(rows, cols, a.iter().copied());
    let svd = matrix.svd(true, true);
    let cutoff = RCOND * svd.singular_values.max();

    // Only fails for a negative cutoff or missing singular vectors.
    let inverse = svd
        .pseudo_inverse(cutoff)
        .unwrap_or_else(|_| DMatrix::zeros(cols, rows));

    Array2::from_shape_fn((cols, rows), |(i, j)| inverse[(i, j)])
}
