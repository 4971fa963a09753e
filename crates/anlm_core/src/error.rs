//! Error type shared by every stage.

use thiserror::Error;

/// Failures reported by the denoising stages.
///
/// Numeric degeneracies (flat tensors, zero local sigma, all-zero weights)
/// are absorbed by fallback rules inside the stages and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NlmError {
    /// Empty planes, mismatched shapes, insufficient padding or an
    /// out-of-range parameter.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A transient buffer could not be reserved.
    #[error("Failed to allocate a {rows}x{cols} working plane")]
    AllocationFailure { rows: usize, cols: usize },
}

pub type NlmResult<T> = Result<T, NlmError>;

impl NlmError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
