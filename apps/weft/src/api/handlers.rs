//! # API Endpoint Handlers
//!
//! `/api/{*path}` hands the request to the session router unchanged; the
//! router's status code and JSON body become the HTTP response.

use super::{
    AppState,
    types::{ApiQuery, HealthResponse},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use weft_core::{Request, Response, WeftError};

// =============================================================================
// HEALTH HANDLER
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// ROUTER HANDLERS
// =============================================================================

/// `GET /api/{*path}`.
pub async fn api_get_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    dispatch(&state, Request::get(router_path(&path))).await
}

/// `PUT /api/{*path}`. An empty body is `null`, which is the delete form for
/// most endpoints.
pub async fn api_put_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ApiQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(err) => return into_http(Response::from_error(&err)),
    };

    let mut request = Request::put(router_path(&path), body);
    if query.skip_history {
        request = request.skipping_history();
    }
    dispatch(&state, request).await
}

// =============================================================================
// HELPERS
// =============================================================================

fn router_path(tail: &str) -> String {
    format!("/{}", tail.trim_start_matches('/'))
}

fn parse_body(bytes: &[u8]) -> Result<Value, WeftError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|e| WeftError::InvalidRequest(format!("Body is not valid JSON: {}", e)))
}

async fn dispatch(state: &AppState, request: Request) -> (StatusCode, Json<Value>) {
    let method = request.method;
    let path = request.path.clone();

    let response = state.session.lock().await.handle(request);

    if response.is_success() {
        tracing::debug!(%method, path = %path, status = response.status, "handled");
    } else {
        tracing::info!(
            %method,
            path = %path,
            status = response.status,
            code = response.error_code().unwrap_or("unknown"),
            "request failed"
        );
    }
    into_http(response)
}

fn into_http(response: Response) -> (StatusCode, Json<Value>) {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body))
}

// =============================================================================
// TESTS
// =============================================================================
