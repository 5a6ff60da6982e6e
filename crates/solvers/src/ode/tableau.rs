use strand_core::{Dynamics, StepIntegrable};

use super::Error;

/// Butcher tableau of an explicit Runge–Kutta method.
///
/// `a[i]` holds the coefficients for stage `i + 1`, so `a` has one row fewer
/// than `c`.
pub(super) struct Tableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

pub(super) const EULER: Tableau = Tableau {
    c: &[0.0],
    a: &[],
    b: &[1.0],
};

pub(super) const MIDPOINT: Tableau = Tableau {
    c: &[0.0, 0.5],
    a: &[&[0.5]],
    b: &[0.0, 1.0],
};

pub(super) const RK4: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Dormand–Prince 5(4).
///
/// The 5th-order weights double as the last row of `a`, so the derivative at
/// the new state is the first stage of the next step.
pub(super) const DOPRI5: Tableau = Tableau {
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0],
    a: &[
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[
            19372.0 / 6561.0,
            -25360.0 / 2187.0,
            64448.0 / 6561.0,
            -212.0 / 729.0,
        ],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
};

/// Difference between the 5th- and 4th-order weights of [`DOPRI5`], with the
/// seventh entry applied to the derivative at the new state.
pub(super) const DOPRI5_ERROR: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339_200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

impl Tableau {
    /// Takes one step of size `h` from `(t, y)`, given the first stage `k1`.
    ///
    /// Returns the new state and every stage derivative.
    pub(super) fn step<D: Dynamics>(
        &self,
        eval: &mut Evaluator<'_, D>,
        t: f64,
        y: &D::State,
        h: f64,
        k1: D::State,
    ) -> Result<(D::State, Vec<D::State>), Error> {
        let mut k = Vec::with_capacity(self.c.len());
        k.push(k1);

        for (row, c) in self.a.iter().zip(&self.c[1..]) {
            let yi = {
                let stage: Vec<(f64, &D::State)> = row.iter().copied().zip(&k).collect();
                y.step(h, &stage)
            };
            k.push(eval.derivative(t + c * h, &yi)?);
        }

        let weights: Vec<(f64, &D::State)> = self.b.iter().copied().zip(&k).collect();
        let next = y.step(h, &weights);
        Ok((next, k))
    }
}

/// Counts derivative evaluations and tags failures with their time.
pub(super) struct Evaluator<'a, D> {
    dynamics: &'a D,
    pub evaluations: usize,
}

impl<'a, D: Dynamics> Evaluator<'a, D> {
    pub(super) fn new(dynamics: &'a D) -> Self {
        Self {
            dynamics,
            evaluations: 0,
        }
    }

    pub(super) fn derivative(&mut self, t: f64, y: &D::State) -> Result<D::State, Error> {
        self.evaluations += 1;
        self.dynamics
            .derivative(t, y)
            .map_err(|err| Error::dynamics(t, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn rows_are_consistent() {
        for tableau in [&EULER, &MIDPOINT, &RK4, &DOPRI5] {
            assert_eq!(tableau.a.len() + 1, tableau.c.len());
            assert_eq!(tableau.b.len(), tableau.c.len());
            assert_relative_eq!(tableau.b.iter().sum::<f64>(), 1.0, epsilon = 1e-14);

            for (row, c) in tableau.a.iter().zip(&tableau.c[1..]) {
                assert_relative_eq!(row.iter().sum::<f64>(), *c, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn error_weights_sum_to_zero() {
        assert_relative_eq!(DOPRI5_ERROR.iter().sum::<f64>(), 0.0, epsilon = 1e-15);
    }
}
