//! API request and response types.

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::execution::ExecutionOutput;

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

impl From<&GuardError> for ErrorResponse {
    fn from(err: &GuardError) -> Self {
        let response = Self::new(err.code(), err.to_string());
        match err {
            GuardError::Timeout {
                partial_output: Some(partial),
            } => response.with_details(partial.clone()),
            _ => response,
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        match &self {
            GuardError::Validation(_)
            | GuardError::PathNotAllowed
            | GuardError::NotFound(_) => tracing::debug!(error = %self, "request rejected"),
            GuardError::RateLimited { .. } => tracing::info!(error = %self, "request throttled"),
            GuardError::PolicyViolation { command, action } => {
                tracing::warn!(command = %command, action = %action, "request rejected by policy")
            }
            GuardError::Timeout { .. } | GuardError::ExecutionFailed { .. } => {
                tracing::warn!(error = %self, "command did not complete")
            }
            GuardError::Io(source) => tracing::error!(error = %source, "internal I/O failure"),
        }

        let status = self.status();
        let mut response = (status, Json(ErrorResponse::from(&self))).into_response();

        if let GuardError::RateLimited { retry_after } = &self {
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Response for a completed command.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    /// Base command that ran (e.g., "pm2").
    pub command: String,
    /// Sub-action that ran.
    pub action: String,
    /// Canonical target the action was applied to.
    pub target: String,
    /// Trimmed standard output.
    pub output: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl ActionResponse {
    pub fn new(
        command: &str,
        action: &str,
        target: impl Into<String>,
        output: &ExecutionOutput,
    ) -> Self {
        Self {
            command: command.to_string(),
            action: action.to_string(),
            target: target.into(),
            output: output.output_trimmed().to_string(),
            duration_ms: output.duration.as_millis() as u64,
        }
    }
}

/// Request to check a port.
///
/// By the time a handler sees this body the port has already been rewritten
/// to its canonical integer form.
#[derive(Debug, Clone, Deserialize)]
pub struct PortCheckRequest {
    pub port: u16,
}

/// Port availability report.
#[derive(Debug, Clone, Serialize)]
pub struct PortCheckResponse {
    pub port: u16,
    /// Whether the port could be bound on loopback.
    pub available: bool,
}

/// Request to create a DNS record.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsRecordRequest {
    /// Canonical (lowercased) record name.
    pub name: String,
}

/// Response for DNS record creation.
#[derive(Debug, Clone, Serialize)]
pub struct DnsRecordResponse {
    /// Canonical record name.
    pub name: String,
    /// Record name with a trailing root dot.
    pub fqdn: String,
    /// Number of labels in the name.
    pub labels: usize,
}
