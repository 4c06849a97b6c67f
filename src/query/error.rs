//! Query failures.

use thiserror::Error;

use crate::policy::key::PolicyError;
use crate::policy::retry::{is_client_error, QueryFailure};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// 4xx: the request itself is wrong. Surfaced immediately.
    #[error("Request rejected with status {status}: {message}")]
    Client { status: u16, message: String },

    /// Network failure, 5xx, or anything else worth retrying.
    #[error("Transient failure{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transient { status: Option<u16>, message: String },

    /// The entry under this key holds a value of another type.
    #[error("Cached value for {key} has a different type")]
    TypeMismatch { key: String },

    /// The loader panicked or its task was cancelled.
    #[error("Load for {key} did not complete: {reason}")]
    Aborted { key: String, reason: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl QueryError {
    /// Classify a failed HTTP response by status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_client_error(status) {
            QueryError::Client { status, message }
        } else {
            QueryError::Transient {
                status: Some(status),
                message,
            }
        }
    }

    /// A failure with no response at all.
    pub fn network(message: impl Into<String>) -> Self {
        QueryError::Transient {
            status: None,
            message: message.into(),
        }
    }
}

impl QueryFailure for QueryError {
    fn http_status(&self) -> Option<u16> {
        match self {
            QueryError::Client { status, .. } => Some(*status),
            QueryError::Transient { status, .. } => *status,
            QueryError::TypeMismatch { .. } | QueryError::Aborted { .. } | QueryError::Policy(_) => {
                None
            }
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryError::TypeMismatch { .. } | QueryError::Aborted { .. } | QueryError::Policy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::retry::RetryPolicy;

    #[test]
    fn test_http_classification() {
        assert!(matches!(QueryError::http(404, "missing"), QueryError::Client { status: 404, .. }));
        assert!(matches!(
            QueryError::http(503, "down"),
            QueryError::Transient { status: Some(503), .. }
        ));
    }

    #[test]
    fn test_retry_eligibility() {
        let policy = RetryPolicy::generic();
        assert!(!policy.should_retry(0, &QueryError::http(404, "missing")));
        assert!(policy.should_retry(0, &QueryError::network("reset")));
        assert!(!policy.should_retry(0, &QueryError::Policy(PolicyError::EmptyKey)));
        let aborted = QueryError::Aborted {
            key: "drone/list".to_string(),
            reason: "loader panicked".to_string(),
        };
        assert!(!policy.should_retry(0, &aborted));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            QueryError::http(502, "bad gateway").to_string(),
            "Transient failure (status 502): bad gateway"
        );
        assert_eq!(QueryError::network("reset").to_string(), "Transient failure: reset");
    }
}
