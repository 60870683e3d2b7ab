//! Error types and JSON error responses for the gate

use crate::gate::GateBody;
use crate::pool::PoolError;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single policy refresh. Never fatal: the previous policy set stays in effect.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Connection failure or timeout talking to the policy source
    #[error("policy source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Policy source answered with a non-success status
    #[error("policy source returned HTTP {0}")]
    Status(u16),
    /// Body was not a JSON array of policy records
    #[error("malformed policy payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Template load failure. The policy gets a minimal fallback page instead.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Unreadable file, including documents that are not valid UTF-8
    #[error("failed to read template {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template {} not found", .0.display())]
    NotFound(PathBuf),
}

/// Failure of the downstream handler to produce a response
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Pool(#[from] PoolError),
    #[error("upstream timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl UpstreamError {
    pub fn code(&self) -> GateErrorCode {
        match self {
            UpstreamError::Pool(PoolError::RequestBuild(_)) => GateErrorCode::InternalError,
            UpstreamError::Pool(PoolError::Client(_)) => GateErrorCode::ConnectionFailed,
            UpstreamError::Timeout(_) => GateErrorCode::RequestTimeout,
        }
    }

    /// Client-facing error response; details stay in the logs
    pub fn to_response(&self) -> Response<GateBody> {
        match self {
            UpstreamError::Pool(PoolError::RequestBuild(_)) => {
                json_error_response(self.code(), "Failed to build upstream request")
            }
            UpstreamError::Pool(PoolError::Client(_)) => {
                json_error_response(self.code(), "Failed to connect to upstream")
            }
            UpstreamError::Timeout(timeout) => json_error_response(
                self.code(),
                format!("Request timed out after {} seconds", timeout.as_secs()),
            ),
        }
    }
}

/// Error codes for failures while forwarding to the upstream
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateErrorCode {
    /// Failed to connect to the upstream
    ConnectionFailed,
    /// Upstream did not answer in time
    RequestTimeout,
    /// Internal gate error
    InternalError,
}

impl GateErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            GateErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            GateErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gate-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GateErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            GateErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            GateErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: GateErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GateErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gate-Error header
pub fn json_error_response(code: GateErrorCode, message: impl Into<String>) -> Response<GateBody> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Gate-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
