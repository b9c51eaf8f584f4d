use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::session::SessionError;
use crate::settings::SettingsError;
use crate::walker::WalkError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly. The JSON body keeps the
/// `{success: false, error}` shape the dashboard checks.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 500 - Filesystem enumeration failed.
    Walk(String),
    /// 500 - Settings file read/write failed.
    Settings(String),
    /// 500 - External path resolution failed.
    Resolution(String),
    /// 409 - A selection is already in flight.
    ScanBusy,
    /// 500 - The worker reported an error marker.
    WorkerFailed(String),
    /// 500 - The worker exited with a nonzero code.
    WorkerExit(i32),
    /// 500 - The worker exited cleanly but produced no output.
    EmptyOutput,
    /// 500 - No worker output within the inactivity window.
    ScanTimeout,
    /// 500 - Could not spawn or reach the worker process.
    WorkerUnavailable(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ScanBusy => StatusCode::CONFLICT,
            ApiError::Walk(_)
            | ApiError::Settings(_)
            | ApiError::Resolution(_)
            | ApiError::WorkerFailed(_)
            | ApiError::WorkerExit(_)
            | ApiError::EmptyOutput
            | ApiError::ScanTimeout
            | ApiError::WorkerUnavailable(_)
            | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Walk(_) => "walk_failed",
            ApiError::Settings(_) => "settings_io_failed",
            ApiError::Resolution(_) => "resolution_failed",
            ApiError::ScanBusy => "scan_busy",
            ApiError::WorkerFailed(_) => "worker_failed",
            ApiError::WorkerExit(_) => "worker_exit",
            ApiError::EmptyOutput => "empty_output",
            ApiError::ScanTimeout => "scan_timeout",
            ApiError::WorkerUnavailable(_) => "worker_unavailable",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidRequest(detail) => format!("Invalid request: {detail}."),
            ApiError::Walk(detail) => format!("Failed to scan directory: {detail}."),
            ApiError::Settings(detail) => {
                format!("Failed to access environment settings: {detail}.")
            }
            ApiError::Resolution(detail) => format!("Failed to resolve path: {detail}."),
            ApiError::ScanBusy => "A selection is already being processed.".to_string(),
            ApiError::WorkerFailed(line) => line.clone(),
            ApiError::WorkerExit(code) => format!("Process exited with code {code}."),
            ApiError::EmptyOutput => "Process completed without output.".to_string(),
            ApiError::ScanTimeout => "Timed out waiting for process output.".to_string(),
            ApiError::WorkerUnavailable(detail) => {
                format!("Failed to start scan process: {detail}.")
            }
            ApiError::InternalError(detail) => format!("Internal error: {detail}."),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message(),
            "code": self.code(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => ApiError::ScanBusy,
            SessionError::Timeout => ApiError::ScanTimeout,
            SessionError::EmptyOutput => ApiError::EmptyOutput,
            SessionError::WorkerExit(code) => ApiError::WorkerExit(code),
            SessionError::WorkerFailed(line) => ApiError::WorkerFailed(line),
            SessionError::Resolution(detail) => ApiError::Resolution(detail),
            SessionError::NoResolvedPath => {
                ApiError::InvalidRequest("no source path has been resolved".into())
            }
            SessionError::Spawn(e) => ApiError::WorkerUnavailable(e.to_string()),
            SessionError::InputClosed => {
                ApiError::WorkerUnavailable("worker input stream is closed".into())
            }
        }
    }
}

impl From<WalkError> for ApiError {
    fn from(err: WalkError) -> Self {
        ApiError::Walk(err.to_string())
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        ApiError::Settings(err.to_string())
    }
}
