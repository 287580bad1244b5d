//! Tagged errors of the video API client

use crate::credentials::ApiOperation;
use serde::Deserialize;
use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of one external API call, tagged by how callers must react
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The credential used is out of quota; rotate and cool it down
    #[error("quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// Short-term request-rate limiting; retried like a transient error
    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    /// Server error, timeout or connection failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// Client error other than quota (bad request, not found, forbidden)
    #[error("permanent failure (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },

    /// The response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Every credential is cooling down or exhausted for the day
    #[error("quota depleted for {operation}")]
    QuotaDepleted { operation: ApiOperation },

    /// The per-tick unit budget cannot cover the next call
    #[error("tick budget exhausted: {cost} units needed, {remaining} remaining")]
    BudgetExhausted { cost: u64, remaining: u64 },
}

impl ApiError {
    /// Worth retrying on the same credential after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Stops the whole tick rather than just the current unit
    pub fn is_depleted(&self) -> bool {
        matches!(self, Self::QuotaDepleted { .. })
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::BudgetExhausted { .. })
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Decode(_) => "decode",
            Self::QuotaDepleted { .. } => "quota_depleted",
            Self::BudgetExhausted { .. } => "budget_exhausted",
        }
    }

    /// Classify a non-success HTTP response
    ///
    /// 403/429 carrying a quota reason are quota failures; rate-limit reasons
    /// and bare 429 are rate limiting; 5xx is transient; everything else is
    /// permanent.
    pub fn from_response(status: u16, body: &str) -> Self {
        let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
        let (reason, message) = envelope
            .map(|e| {
                let reason = e
                    .error
                    .errors
                    .first()
                    .map(|d| d.reason.clone())
                    .unwrap_or_default();
                (reason, e.error.message)
            })
            .unwrap_or_default();

        match (status, reason.as_str()) {
            (403 | 429, "quotaExceeded" | "dailyLimitExceeded") => Self::QuotaExceeded { reason },
            (403 | 429, "rateLimitExceeded" | "userRateLimitExceeded") => {
                Self::RateLimited { reason }
            }
            (429, _) => Self::RateLimited {
                reason: "HTTP 429".to_string(),
            },
            (500..=599, _) => Self::Transient(format!("HTTP {status}")),
            _ => Self::Permanent {
                status,
                message: if message.is_empty() { reason } else { message },
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_response(status.as_u16(), "")
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: u16, reason: &str) -> String {
        format!(
            r#"{{"error":{{"code":{code},"message":"msg","errors":[{{"reason":"{reason}","domain":"youtube.quota"}}]}}}}"#
        )
    }

    #[test]
    fn test_quota_exceeded_classification() {
        let err = ApiError::from_response(403, &body(403, "quotaExceeded"));
        assert!(err.is_quota_exceeded());

        let err = ApiError::from_response(403, &body(403, "dailyLimitExceeded"));
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn test_rate_limit_classification() {
        assert!(ApiError::from_response(403, &body(403, "rateLimitExceeded")).is_transient());
        assert!(ApiError::from_response(429, "").is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            assert!(ApiError::from_response(status, "").is_transient());
        }
    }

    #[test]
    fn test_other_client_errors_are_permanent() {
        let err = ApiError::from_response(403, &body(403, "forbidden"));
        assert!(matches!(err, ApiError::Permanent { status: 403, .. }));

        let err = ApiError::from_response(404, &body(404, "playlistNotFound"));
        assert!(matches!(err, ApiError::Permanent { status: 404, .. }));
        assert!(!err.is_transient());

        let err = ApiError::from_response(400, "not json");
        assert_eq!(err.kind(), "permanent");
    }
}
