//! Error kinds raised by the engine.
//!
//! Public operations return `anyhow::Result`; the variants below are the
//! typed payloads, recoverable with `err.downcast_ref::<SbmError>()`.
//! Optimizer non-convergence is not an error and never shows up here.

use thiserror::Error;

/// Typed failure of an engine operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SbmError {
    /// Algorithm name outside the supported set
    #[error("unsupported algorithm name: \"{name}\"; supported: {supported}")]
    UnsupportedAlgorithm {
        /// The rejected name
        name: String,
        /// Space-separated list of accepted names
        supported: String,
    },

    /// An optimizer option could not be applied
    #[error("optimizer option `{option}` rejected: {reason}")]
    OptimizerConfig {
        /// Option key, e.g. `ftol_rel`
        option: &'static str,
        /// What was wrong with the value
        reason: String,
    },

    /// Vector length does not match what the caller declared
    #[error("{context}: expected length {expected}, found {found}")]
    DimensionMismatch {
        /// Which input was checked
        context: &'static str,
        /// Declared length
        expected: usize,
        /// Actual length
        found: usize,
    },

    /// Matrix shape does not match what the caller declared
    #[error("{context}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Which input was checked
        context: &'static str,
        /// `(rows, cols)`
        expected: (usize, usize),
        /// `(rows, cols)`
        found: (usize, usize),
    },

    /// Adjacency / observation mask pair is malformed
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

/// Fail with [`SbmError::ShapeMismatch`] unless `found == expected`
pub(crate) fn check_shape(
    context: &'static str,
    expected: (usize, usize),
    found: (usize, usize),
) -> anyhow::Result<()> {
    if expected != found {
        return Err(SbmError::ShapeMismatch {
            context,
            expected,
            found,
        }
        .into());
    }
    Ok(())
}

/// Fail with [`SbmError::DimensionMismatch`] unless `found == expected`
pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> anyhow::Result<()> {
    if expected != found {
        return Err(SbmError::DimensionMismatch {
            context,
            expected,
            found,
        }
        .into());
    }
    Ok(())
}
