//! Error types for startup and request handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised before the listener accepts requests.
///
/// Every variant ends the process with exit code 1.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The resolved port is already bound by another process.
    #[error("Port {port} already in use. Try another: {retry_command}")]
    PortInUse {
        port: u16,
        /// Alternative port offered to the operator.
        suggestion: u16,
        /// Full invocation that retries with `suggestion`.
        retry_command: String,
    },

    /// Probing the port failed for a reason other than it being in use.
    #[error("Unable to probe port: {0}")]
    PortProbe(#[source] std::io::Error),

    /// The real listener could not bind.
    #[error("Unable to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The target file guard refused to continue.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The HTTP server stopped with an I/O error.
    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Reasons the target file guard terminates startup.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Target is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Absent and creation was declined or impossible to ask for.
    #[error("Target file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to create file {}: {source}", path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to access target file {}: {source}", path.display())]
    Access {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from the public tunnel client.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("tunnel service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid tunnel host: {0}")]
    InvalidHost(String),
}

/// A per-request failure rendered as `{error, details}` JSON.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<String>,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    pub fn internal(error: impl Into<String>, details: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error).with_details(details)
    }

    pub fn with_details(mut self, details: impl ToString) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: &self.error,
            details: self.details.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_error_renders_json_body() {
        let response = ApiError::internal("Could not read file", "permission denied").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Could not read file");
        assert_eq!(body["details"], "permission denied");
    }

    #[tokio::test]
    async fn api_error_omits_missing_details() {
        let response = ApiError::new(StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("details").is_none());
    }

    #[test]
    fn port_in_use_message_carries_retry_command() {
        let err = StartupError::PortInUse {
            port: 3000,
            suggestion: 4242,
            retry_command: "PORT=4242 webedit notes.md".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Port 3000 already in use. Try another: PORT=4242 webedit notes.md"
        );
        assert_eq!(err.exit_code(), 1);
    }
}
