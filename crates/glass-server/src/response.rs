//! JSON response types and error-to-status mapping.
//!
//! Every endpoint answers JSON. Invocation-local faults map onto 4xx/5xx
//! statuses that tell the caller whose fault the failure was: theirs (bad
//! function name, bad arguments), the guest's (trap, bounds violation), or
//! the platform's (store backend down).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use glass_common::{RuntimeError, StateError};

/// Successful invocation response body.
#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub success: bool,
    pub function: String,
    pub instance_id: String,
    pub results: Vec<u64>,
    pub metrics: InvokeMetrics,
}

/// Per-invocation metrics reported alongside results.
#[derive(Debug, Serialize)]
pub struct InvokeMetrics {
    pub duration_ms: u128,
}

impl IntoResponse for InvokeResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub kind: &'static str,
}

impl ErrorResponse {
    /// Build an error response from a runtime error, with its HTTP status.
    pub fn from_runtime_error(err: &RuntimeError) -> (StatusCode, Self) {
        let status = error_status(err);
        let body = Self {
            success: false,
            error: err.to_string(),
            kind: error_kind(err),
        };
        (status, body)
    }

    /// Build a bad-request response for malformed caller input.
    pub fn bad_request(message: impl Into<String>) -> (StatusCode, Self) {
        (
            StatusCode::BAD_REQUEST,
            Self {
                success: false,
                error: message.into(),
                kind: "bad_request",
            },
        )
    }

    /// Build a service-unavailable response.
    pub fn unavailable(message: impl Into<String>) -> (StatusCode, Self) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Self {
                success: false,
                error: message.into(),
                kind: "unavailable",
            },
        )
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        // Status is carried by the (StatusCode, Self) tuple at call sites;
        // a bare ErrorResponse defaults to 500
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Map a runtime error onto an HTTP status code.
fn error_status(err: &RuntimeError) -> StatusCode {
    match err {
        RuntimeError::FunctionNotFound { .. } => StatusCode::NOT_FOUND,
        RuntimeError::InvalidModule { .. } => StatusCode::BAD_REQUEST,
        RuntimeError::ExecutionTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        RuntimeError::FuelExhausted => StatusCode::TOO_MANY_REQUESTS,
        RuntimeError::State(StateError::BackendUnavailable { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RuntimeError::State(StateError::InvalidKey) => StatusCode::BAD_REQUEST,
        RuntimeError::MemoryBoundsViolation { .. }
        | RuntimeError::InvocationFailed { .. }
        | RuntimeError::InvalidConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Stable machine-readable error kind for response bodies.
fn error_kind(err: &RuntimeError) -> &'static str {
    match err {
        RuntimeError::InvalidModule { .. } => "invalid_module",
        RuntimeError::FunctionNotFound { .. } => "function_not_found",
        RuntimeError::MemoryBoundsViolation { .. } => "memory_bounds_violation",
        RuntimeError::InvocationFailed { .. } => "invocation_failed",
        RuntimeError::FuelExhausted => "fuel_exhausted",
        RuntimeError::ExecutionTimeout { .. } => "execution_timeout",
        RuntimeError::State(StateError::BackendUnavailable { .. }) => "backend_unavailable",
        RuntimeError::State(StateError::InvalidKey) => "invalid_key",
        RuntimeError::InvalidConfig { .. } => "invalid_config",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_not_found_maps_to_404() {
        let err = RuntimeError::function_not_found("absent");
        let (status, body) = ErrorResponse::from_runtime_error(&err);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.kind, "function_not_found");
    }

    #[test]
    fn test_backend_unavailable_maps_to_503() {
        let err = RuntimeError::State(StateError::backend_unavailable("down"));
        let (status, body) = ErrorResponse::from_runtime_error(&err);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.kind, "backend_unavailable");
    }

    #[test]
    fn test_timeout_maps_to_408() {
        let err = RuntimeError::ExecutionTimeout { duration_ms: 100 };
        let (status, _) = ErrorResponse::from_runtime_error(&err);
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_fuel_exhausted_maps_to_429() {
        let (status, _) = ErrorResponse::from_runtime_error(&RuntimeError::FuelExhausted);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_guest_faults_map_to_500() {
        let err = RuntimeError::MemoryBoundsViolation {
            ptr: 0xFFFF_0000,
            len: 64,
            memory_size: 65536,
        };
        let (status, body) = ErrorResponse::from_runtime_error(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.kind, "memory_bounds_violation");
    }
}
