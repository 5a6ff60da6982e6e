use crate::function::BoxError;

/// Errors that can occur during a reverse-mode sweep.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("gradient output must be 1x1, got {rows}x{cols}")]
    NotScalar { rows: usize, cols: usize },

    #[error("cotangent has shape {found:?} but the output has shape {expected:?}")]
    CotangentShape {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("custom backward `{name}` failed")]
    Function {
        name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("custom backward `{name}` returned {found} gradients for {expected} inputs")]
    FunctionArity {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "custom backward `{name}` returned a gradient of shape {found:?} for input {index} of shape {expected:?}"
    )]
    FunctionGradientShape {
        name: &'static str,
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
}
