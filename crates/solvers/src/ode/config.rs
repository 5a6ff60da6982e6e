use thiserror::Error;

/// Supported integration methods.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    /// Explicit Euler, first order.
    Euler,

    /// Explicit midpoint, second order.
    Midpoint,

    /// Classic fixed-step 4th-order Runge–Kutta method.
    Rk4,

    /// Adaptive Dormand–Prince 5(4) Runge–Kutta method.
    ///
    /// An embedded pair whose 4th-order companion estimates the local error.
    /// The step is accepted when the error, scaled per element by
    /// `abs_tol + rel_tol · max(|y_n|, |y_{n+1}|)`, has an RMS of at most one.
    Dopri5 { abs_tol: f64, rel_tol: f64 },
}

/// Configuration for the ODE solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub method: Method,

    /// Step size magnitude.
    ///
    /// Fixed-step methods split each grid interval into `⌈|Δt| / h⌉` equal
    /// steps, taking one step per interval when unset. Adaptive methods use
    /// it as the first trial step and otherwise select one automatically.
    pub step_size: Option<f64>,

    /// Budget of accepted plus rejected steps.
    pub max_steps: usize,
}

/// Errors that can occur when validating an ODE solver config.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("abs_tol must be finite and non-negative")]
    AbsTol,

    #[error("rel_tol must be finite and non-negative")]
    RelTol,

    #[error("abs_tol and rel_tol cannot both be zero")]
    ZeroTolerance,

    #[error("step_size must be finite and positive")]
    StepSize,

    #[error("max_steps must be positive")]
    MaxSteps,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            method: Method::Dopri5 {
                abs_tol: 1e-4,
                rel_tol: 1e-4,
            },
            step_size: None,
            max_steps: 10_000,
        }
    }
}

impl Config {
    /// Creates a config for `method` with default step settings.
    #[must_use]
    pub fn with_method(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Validates tolerances, step size and step budget.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Method::Dopri5 { abs_tol, rel_tol } = self.method {
            if !abs_tol.is_finite() || abs_tol < 0.0 {
                return Err(ConfigError::AbsTol);
            }
            if !rel_tol.is_finite() || rel_tol < 0.0 {
                return Err(ConfigError::RelTol);
            }
            if abs_tol == 0.0 && rel_tol == 0.0 {
                return Err(ConfigError::ZeroTolerance);
            }
        }
        if let Some(h) = self.step_size {
            if !h.is_finite() || h <= 0.0 {
                return Err(ConfigError::StepSize);
            }
        }
        if self.max_steps == 0 {
            return Err(ConfigError::MaxSteps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_adaptive() {
        let config = Config::default();

        assert_eq!(config.validate(), Ok(()));
        assert!(matches!(config.method, Method::Dopri5 { .. }));
    }

    #[test]
    fn rejects_bad_values() {
        let negative_tol = Config::with_method(Method::Dopri5 {
            abs_tol: -1.0,
            rel_tol: 1e-3,
        });
        assert_eq!(negative_tol.validate(), Err(ConfigError::AbsTol));

        let nan_tol = Config::with_method(Method::Dopri5 {
            abs_tol: 1e-3,
            rel_tol: f64::NAN,
        });
        assert_eq!(nan_tol.validate(), Err(ConfigError::RelTol));

        let zero_tol = Config::with_method(Method::Dopri5 {
            abs_tol: 0.0,
            rel_tol: 0.0,
        });
        assert_eq!(zero_tol.validate(), Err(ConfigError::ZeroTolerance));

        let zero_step = Config {
            step_size: Some(0.0),
            ..Config::with_method(Method::Rk4)
        };
        assert_eq!(zero_step.validate(), Err(ConfigError::StepSize));

        let no_budget = Config {
            max_steps: 0,
            ..Config::default()
        };
        assert_eq!(no_budget.validate(), Err(ConfigError::MaxSteps));
    }
}
