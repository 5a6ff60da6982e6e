use std::error::Error as StdError;

/// Errors raised by the core contracts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vector field error: {0}")]
    Field(#[source] Box<dyn StdError + Send + Sync>),

    #[error("vector field returned shape {found:?} for a state of shape {expected:?}")]
    Shape {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("expected {expected} parameter values, got {found}")]
    ParameterCount { expected: usize, found: usize },
}

impl Error {
    pub(crate) fn field<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Field(Box::new(err))
    }
}
