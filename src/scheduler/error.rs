//! Error types for the scheduler module

use thiserror::Error;

use crate::pipeline::PipelineError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Cycle state or lock could not be read or written
    #[error("scheduler store error: {0:#}")]
    Store(anyhow::Error),

    /// A region or backfill job failed outside the per-unit handling
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The tick body panicked; the lock was still released
    #[error("tick panicked: {0}")]
    Panicked(String),

    /// Persisted state the scheduler refuses to run from
    #[error("invalid cycle state: {reason}")]
    InvalidState { reason: String },
}

impl SchedulerError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(err)
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Check if the next tick may succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(_) | Self::Panicked(_) => true,
            Self::Pipeline(e) => e.is_recoverable(),
            Self::InvalidState { .. } => false,
        }
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = SchedulerError::store(anyhow::anyhow!("database is locked"));
        assert!(err.to_string().contains("database is locked"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_state_is_fatal() {
        let err = SchedulerError::invalid_state("day 0 out of range");
        assert!(err.to_string().contains("day 0"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_pipeline_error() {
        let err: SchedulerError = PipelineError::Store(anyhow::anyhow!("disk full")).into();
        assert!(matches!(err, SchedulerError::Pipeline(_)));
        assert!(err.is_recoverable());
    }
}
