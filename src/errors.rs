//! Error types for pipeline operations.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid parameter value provided at construction
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// Submit was called after the pipeline was closed
    #[error("Submit on a closed pipeline")]
    ClosedOnSubmit,

    /// The map collaborator returned an error; the run is incomplete
    #[error("Map stage failed: {0}")]
    MapFailed(#[source] anyhow::Error),

    /// The reduce collaborator returned an error; the run is incomplete
    #[error("Reduce stage failed: {0}")]
    ReduceFailed(#[source] anyhow::Error),

    /// A collaborator panicked on a pipeline thread
    #[error("{stage} collaborator panicked: {message}")]
    WorkerPanic {
        /// Which stage panicked ("map" or "reduce")
        stage: &'static str,
        /// Message extracted from the panic payload
        message: String,
    },
}

/// Error returned when pushing into a closed container.
///
/// Carries the rejected item so the caller can recover it. `Debug` and
/// `Display` are implemented manually to keep `T` unconstrained.
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Push to a closed container")
    }
}

impl<T> std::error::Error for PushError<T> {}
