//! Error types for the web server.
//!
//! [`ServerError`] covers configuration, binding, serving and fatal shutdown. It also
//! implements axum's `IntoResponse`, so the server's own endpoints can return it
//! directly.

use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use isomorph_runtime::metrics::MetricsError;
use serde::Serialize;
use thiserror::Error;

/// Errors from configuring and running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    ReadConfig {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`ServerConfig`](crate::ServerConfig)
    #[error("Failed to parse configuration: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// A configuration value is out of range
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Metrics could not be installed
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// `/metrics` was requested while metrics are disabled
    #[error("Metrics are disabled")]
    MetricsDisabled,

    /// The server shut down after a process-fatal failure
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ServerError {
    /// HTTP status for this error when returned from a handler.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MetricsDisabled => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ReadConfig { .. } | Self::ParseConfig(_) | Self::ValidationError(_) => {
                "CONFIG_ERROR"
            },
            Self::Bind { .. } | Self::Serve(_) => "SERVER_ERROR",
            Self::Metrics(_) => "METRICS_ERROR",
            Self::MetricsDisabled => "NOT_FOUND",
            Self::Fatal(_) => "FATAL",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Server endpoint failed");
        }
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
