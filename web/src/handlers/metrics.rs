//! Prometheus exposition endpoint.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::ServerError;
use crate::state::AppState;

/// Content type of the Prometheus text format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `GET /metrics`.
///
/// # Errors
///
/// Returns [`ServerError::MetricsDisabled`] (404) when the server runs without a
/// recorder.
#[allow(clippy::unused_async)]
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, ServerError> {
    let handle = state.metrics.ok_or(ServerError::MetricsDisabled)?;
    Ok(([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], handle.render()).into_response())
}
