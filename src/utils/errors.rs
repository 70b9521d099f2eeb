//! Error types for the stencil optimizer.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them.

use thiserror::Error;

use crate::ir::{BufferId, IndexId, ValueId};

/// Top-level error type for the optimizer.
#[derive(Error, Debug)]
pub enum StencilOptError {
    /// Error in pass configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error while constructing or validating IR
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    /// Error during transformation
    #[error("Transformation error: {0}")]
    Transform(#[from] TransformError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error in pass configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The stencil pass cannot amortize outer iterations over zero threads.
    #[error("thread count must be a positive integer, got {0}")]
    InvalidThreadCount(usize),
}

/// Error while constructing or validating IR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    /// Reference to a buffer not registered with the function
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// Reference to an index variable not registered with the function
    #[error("unknown index variable {0}")]
    UnknownIndex(IndexId),

    /// Use of an SSA value with no defining operation earlier in the body
    #[error("use of undefined value {0}")]
    UndefinedValue(ValueId),

    /// An index variable appears twice in one band
    #[error("index variable {0} listed twice in a band")]
    DuplicateIndex(IndexId),

    /// Iteration range must be a positive constant
    #[error("index variable {name:?} has non-positive range {range}")]
    InvalidRange {
        /// Name of the offending index variable
        name: String,
        /// The rejected range
        range: i64,
    },

    /// Buffer dimension sizes must be positive constants
    #[error("buffer {name:?} has non-positive dimension {size}")]
    InvalidBufferDim {
        /// Name of the offending buffer
        name: String,
        /// The rejected dimension size
        size: i64,
    },

    /// An access map's result count does not match the buffer rank,
    /// or its operand count does not match its dimension count
    #[error("access arity mismatch: expected {expected}, got {found}")]
    ArityMismatch {
        /// Expected count
        expected: usize,
        /// Actual count
        found: usize,
    },

    /// Band bodies must end with a terminator
    #[error("band body must end with a yield terminator")]
    MissingTerminator,
}

/// Error during transformation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A rewrite found an operation of a different kind than the one
    /// the capture predicate matched.
    #[error("{transform}: expected {expected} at the matched position")]
    UnexpectedBodyShape {
        /// Name of the transformation that failed
        transform: &'static str,
        /// What the rewrite expected to find
        expected: &'static str,
    },
}

/// Result type using StencilOptError.
pub type Result<T> = std::result::Result<T, StencilOptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidThreadCount(0);
        assert!(format!("{}", err).contains("positive"));

        let err = IrError::ArityMismatch {
            expected: 2,
            found: 3,
        };
        let s = format!("{}", err);
        assert!(s.contains('2') && s.contains('3'));
    }

    #[test]
    fn test_error_conversion() {
        let err: StencilOptError = ConfigError::InvalidThreadCount(0).into();
        assert!(matches!(err, StencilOptError::Config(_)));
    }
}
