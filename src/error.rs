//! Error types for opsguard.
//!
//! Every variant is request-scoped and recoverable. Display texts are returned
//! to HTTP callers verbatim and never name a path, policy entry or exit status;
//! those go to the log.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::security::ValidationError;

/// Main error type for opsguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Input failed a sanitizer's character, format or length rule.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Resolved path lies outside every allowed root.
    #[error("path not permitted")]
    PathNotAllowed,

    /// Requested action is not registered for its base command.
    #[error("action not permitted")]
    PolicyViolation { command: String, action: String },

    /// Caller exceeded the rate limit for this operation class.
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Child process exceeded its allotted time and was killed.
    #[error("operation timed out")]
    Timeout { partial_output: Option<String> },

    /// Child process exited non-zero or could not be spawned.
    #[error("command execution failed")]
    ExecutionFailed { exit_code: Option<i32> },

    /// Target resource does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// I/O error while performing a privileged operation.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PathNotAllowed => "PATH_NOT_ALLOWED",
            Self::PolicyViolation { .. } => "POLICY_VIOLATION",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "EXECUTION_TIMEOUT",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the API layer answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PathNotAllowed => StatusCode::BAD_REQUEST,
            Self::PolicyViolation { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ExecutionFailed { .. } | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is the expected outcome of a caller mistake or
    /// throttling, rather than a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::PathNotAllowed
                | Self::PolicyViolation { .. }
                | Self::RateLimited { .. }
                | Self::NotFound(_)
        )
    }
}

/// Convenience Result type for opsguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
