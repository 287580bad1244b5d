//! Unified error handling for the harvester crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while keeping the component errors usable
//! on their own.
//!
//! # Architecture
//!
//! - [`HarvestErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use playlist_harvester::error::{Error, HarvestErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::api::error::ApiError;
pub use crate::pipeline::PipelineError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::seeds::SeedError;

/// Common trait for harvester error types
pub trait HarvestErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Quota exhaustion on one or every credential
    Quota,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler and locking errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Quota => "quota",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the harvester crate
#[derive(Error, Debug)]
pub enum Error {
    /// External API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Ingestion pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Seed plan errors
    #[error("Seed error: {0}")]
    Seed(#[from] SeedError),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// PostgreSQL errors
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvestErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient() || e.is_quota_exceeded() || e.is_depleted(),
            Self::Pipeline(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Seed(_) => false,
            Self::Database(_) => false,
            Self::Postgres(_) => true, // connection drops are common
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Api(e) => api_category(e),
            Self::Pipeline(PipelineError::Api(e)) => api_category(e),
            Self::Pipeline(PipelineError::Store(_)) => ErrorCategory::Storage,
            Self::Pipeline(_) => ErrorCategory::Other,
            Self::Scheduler(SchedulerError::Store(_)) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Seed(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Database(_) | Self::Postgres(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
            Self::Http(_) => ErrorCategory::Network,
        }
    }
}

fn api_category(e: &ApiError) -> ErrorCategory {
    match e {
        ApiError::QuotaExceeded { .. }
        | ApiError::QuotaDepleted { .. }
        | ApiError::BudgetExhausted { .. } => ErrorCategory::Quota,
        _ => ErrorCategory::Network,
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ApiOperation;

    #[test]
    fn test_error_category() {
        let quota = Error::Api(ApiError::QuotaDepleted {
            operation: ApiOperation::Search,
        });
        assert_eq!(quota.category(), ErrorCategory::Quota);

        let transient = Error::Api(ApiError::Transient("503".into()));
        assert_eq!(transient.category(), ErrorCategory::Network);

        let store = Error::Pipeline(PipelineError::Store(anyhow::anyhow!("disk full")));
        assert_eq!(store.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Api(ApiError::Transient("timeout".into())).is_recoverable());

        let permanent = Error::Api(ApiError::Permanent {
            status: 404,
            message: "playlistNotFound".into(),
        });
        assert!(!permanent.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let unified: Error = SeedError::InvalidShape("slots".into()).into();
        assert!(matches!(unified, Error::Seed(_)));
        assert_eq!(unified.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("no credentials configured");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Config error: no credentials configured");
    }

    #[test]
    fn test_anyhow_keeps_context_chain() {
        let err: Error = anyhow::anyhow!("locked").context("Failed to save cursor").into();
        assert_eq!(err.to_string(), "Failed to save cursor: locked");
    }
}
