//! Health check endpoint.
//!
//! Used by load balancers and monitoring systems to verify the process is up.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::AppState;

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    /// Always `ok` while the process answers
    pub status: &'static str,
    /// Host the application runs on
    pub target: String,
    /// Configured application name, empty when unset
    pub wapp: String,
}

/// Simple health check endpoint (for basic liveness).
///
/// Does not dispatch through the application.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "target": "server",
///   "wapp": "shop"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let config = state.app.config();
    (
        StatusCode::OK,
        Json(Health {
            status: "ok",
            target: config.target.to_string(),
            wapp: config.globals.wapp.clone(),
        }),
    )
}
