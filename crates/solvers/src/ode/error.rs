use std::error::Error as StdError;

use super::ConfigError;

/// Errors that can occur during ODE integration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("time grid needs at least two points, got {len}")]
    GridTooShort { len: usize },

    #[error("time grid is not strictly monotonic at index {index}")]
    NonMonotonicGrid { index: usize },

    #[error("time grid has a non-finite value at index {index}")]
    NonFiniteTime { index: usize },

    #[error("exceeded {max_steps} steps at t = {t}")]
    MaxStepsExceeded { max_steps: usize, t: f64 },

    #[error("step size {h:e} at t = {t} is too small to meet the tolerances")]
    StepSizeTooSmall { h: f64, t: f64 },

    #[error("dynamics error at t = {t}: {source}")]
    Dynamics {
        t: f64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    pub(crate) fn dynamics<E: StdError + Send + Sync + 'static>(t: f64, err: E) -> Self {
        Self::Dynamics {
            t,
            source: Box::new(err),
        }
    }
}
