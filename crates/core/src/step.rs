use strand_autodiff::Tensor;

/// A state type that explicit Runge–Kutta schemes can integrate.
///
/// A stage derivative has the same type as the state, so every scheme is
/// expressed through weighted sums `delta · Σ wᵢ kᵢ`. Zero weights are
/// skipped, which keeps sparse tableau rows from adding dead work.
///
/// Implementations used with differentiable states should build the sums
/// from recorded operations, while [`StepIntegrable::scaled_rms`] and
/// [`StepIntegrable::all_finite`] read values only.
pub trait StepIntegrable: Clone {
    /// Returns `delta · Σ wᵢ kᵢ` over `stages = [(wᵢ, kᵢ), …]`.
    ///
    /// At least one weight must be non-zero.
    #[must_use]
    fn combine(delta: f64, stages: &[(f64, &Self)]) -> Self;

    /// Returns `self + delta · Σ wᵢ kᵢ`.
    #[must_use]
    fn step(&self, delta: f64, stages: &[(f64, &Self)]) -> Self;

    /// Returns the root-mean-square of `self` scaled element-wise by
    /// `abs_tol + rel_tol · max |rⱼ|` over `references`.
    ///
    /// Composite states may combine per-component norms; the adaptive
    /// controller accepts a step when the result is at most one.
    fn scaled_rms(&self, references: &[&Self], abs_tol: f64, rel_tol: f64) -> f64;

    /// Returns `true` if every value is finite.
    fn all_finite(&self) -> bool;
}

impl StepIntegrable for Tensor {
    fn combine(delta: f64, stages: &[(f64, &Self)]) -> Self {
        let mut terms = stages
            .iter()
            .filter(|(weight, _)| *weight != 0.0)
            .map(|(weight, k)| k.scale(weight * delta));

        let Some(first) = terms.next() else {
            let (rows, cols) = stages.first().map_or((0, 0), |(_, k)| k.shape());
            return Tensor::zeros(rows, cols);
        };
        terms.fold(first, |sum, term| sum.add(&term))
    }

    fn step(&self, delta: f64, stages: &[(f64, &Self)]) -> Self {
        self.add(&Self::combine(delta, stages))
    }

    fn scaled_rms(&self, references: &[&Self], abs_tol: f64, rel_tol: f64) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }

        let sum_sq: f64 = self
            .value()
            .indexed_iter()
            .map(|(index, value)| {
                let magnitude = references
                    .iter()
                    .map(|r| r.value()[index].abs())
                    .fold(0.0, f64::max);
                let scaled = value / (abs_tol + rel_tol * magnitude);
                scaled * scaled
            })
            .sum();

        (sum_sq / len as f64).sqrt()
    }

    fn all_finite(&self) -> bool {
        Tensor::all_finite(self)
    }
}
