//! Request handlers for guest invocation and diagnostics.

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::response::{ErrorResponse, InvokeMetrics, InvokeResponse};
use crate::state::AppState;

/// Invoke a guest export.
///
/// `GET /invoke/:function?args=1,2,3` or `GET /invoke/:function?value=N`
///
/// Arguments are a comma-separated list of u64 values in the `args` query
/// parameter; `value=N` is the single-argument shorthand, mapping to the
/// first argument. Omitted trailing arguments default to 0. Every request
/// runs in a fresh, disposable sandbox instance.
#[instrument(skip(state, params), fields(function = %function))]
pub async fn invoke_function(
    State(state): State<AppState>,
    Path(function): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();
    let instance_id = format!("request-{}", Uuid::new_v4());

    let args = match parse_args(&params) {
        Ok(args) => args,
        Err(message) => return ErrorResponse::bad_request(message).into_response(),
    };

    let Some(artifact) = state.artifact() else {
        return ErrorResponse::unavailable("no guest module loaded").into_response();
    };

    info!(
        instance_id = %instance_id,
        args = args.len(),
        "Handling invocation request"
    );

    match state
        .invoker()
        .invoke(&artifact, &function, &args, Some(instance_id.clone()))
        .await
    {
        Ok(results) => InvokeResponse {
            success: true,
            function,
            instance_id,
            results,
            metrics: InvokeMetrics {
                duration_ms: start.elapsed().as_millis(),
            },
        }
        .into_response(),
        Err(err) => {
            error!(instance_id = %instance_id, error = %err, "Invocation request failed");
            ErrorResponse::from_runtime_error(&err).into_response()
        }
    }
}

/// Parse the `args` / `value` query parameters into u64 arguments.
///
/// `args` takes precedence when both are given; `value` maps to the first
/// argument only.
fn parse_args(params: &HashMap<String, String>) -> Result<Vec<u64>, String> {
    if let Some(raw) = params.get("args") {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        return raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .map_err(|_| format!("invalid argument '{part}': expected a u64"))
            })
            .collect();
    }

    if let Some(raw) = params.get("value") {
        return raw
            .trim()
            .parse::<u64>()
            .map(|v| vec![v])
            .map_err(|_| format!("invalid value '{raw}': expected a u64"));
    }

    Ok(Vec::new())
}

/// Health check handler.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": "healthy",
            "node_id": state.node_id(),
            "timestamp": unix_now_secs(),
        })),
    )
}

/// Seconds since the Unix epoch.
fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runtime metrics handler.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let artifact = state.artifact();

    axum::Json(serde_json::json!({
        "node_id": state.node_id(),
        "uptime_secs": state.uptime_secs(),
        "guest_loaded": artifact.is_some(),
        "guest_hash": artifact.as_ref().map(|a| a.content_hash().to_string()),
        "guest_compiled_age_secs": artifact.as_ref().map(|a| a.compiled_at().elapsed().as_secs()),
        "compile_count": state.loader().compile_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_args_absent_is_empty() {
        assert_eq!(parse_args(&params(&[])).unwrap(), Vec::<u64>::new());
        assert_eq!(
            parse_args(&params(&[("args", "")])).unwrap(),
            Vec::<u64>::new()
        );
    }

    #[test]
    fn test_parse_args_list() {
        assert_eq!(
            parse_args(&params(&[("args", "1, 2,3")])).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_parse_args_rejects_non_numeric() {
        assert!(parse_args(&params(&[("args", "1,two")])).is_err());
    }

    #[test]
    fn test_parse_args_rejects_negative() {
        assert!(parse_args(&params(&[("args", "-1")])).is_err());
    }

    #[test]
    fn test_parse_value_shorthand() {
        // The single-argument calling convention: value maps to args[0]
        assert_eq!(parse_args(&params(&[("value", "7")])).unwrap(), vec![7]);
        assert!(parse_args(&params(&[("value", "x")])).is_err());
    }

    #[test]
    fn test_parse_args_takes_precedence_over_value() {
        assert_eq!(
            parse_args(&params(&[("args", "1,2"), ("value", "9")])).unwrap(),
            vec![1, 2]
        );
    }
}
