//! Prometheus metrics for dispatches, handlers and stores.
//!
//! Recording goes through the `metrics` facade, so it is free when no recorder is
//! installed. [`MetricsServer`] installs the Prometheus recorder and renders the text
//! exposition; the web crate serves it on `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use isomorph_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//! let exposition = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder and renderer.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an exporter that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If another recorder is already installed (e.g., in tests), this logs a warning
    /// and succeeds; [`Self::render`] then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder isn't installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!("isomorph_dispatch_total", "Total number of dispatches handled");
    describe_counter!(
        "isomorph_dispatch_not_found_total",
        "Dispatches that fell through to the 404 terminal"
    );
    describe_histogram!(
        "isomorph_dispatch_duration_seconds",
        "Time taken to run the application pipeline"
    );
    describe_counter!(
        "isomorph_handler_errors_total",
        "Handlers that returned an error"
    );
    describe_counter!(
        "isomorph_store_dispatch_total",
        "Actions dispatched into stores"
    );
    describe_counter!(
        "isomorph_store_failures_total",
        "Reducer and listener failures during store dispatch"
    );
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a finished dispatch on `target`.
    pub fn record_dispatch(target: &'static str, duration: Duration) {
        counter!("isomorph_dispatch_total", "target" => target).increment(1);
        histogram!("isomorph_dispatch_duration_seconds", "target" => target)
            .record(duration.as_secs_f64());
    }

    /// Record a dispatch answered by the 404 terminal.
    pub fn record_not_found() {
        counter!("isomorph_dispatch_not_found_total").increment(1);
    }

    /// Record a handler error.
    pub fn record_handler_error() {
        counter!("isomorph_handler_errors_total").increment(1);
    }

    /// Record a store dispatch and its isolated failures.
    pub fn record_store_dispatch(failures: usize) {
        counter!("isomorph_store_dispatch_total").increment(1);
        if failures > 0 {
            counter!("isomorph_store_failures_total").increment(failures as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        DispatchMetrics::record_dispatch("server", Duration::from_millis(3));
        DispatchMetrics::record_not_found();
        DispatchMetrics::record_handler_error();
        DispatchMetrics::record_store_dispatch(2);
    }

    #[test]
    fn unstarted_server_renders_nothing() {
        let server = MetricsServer::new();
        assert!(server.render().is_none());
        assert!(server.handle().is_none());
    }
}
