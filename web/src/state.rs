//! Shared state for axum handlers.

use std::fmt;
use std::sync::Arc;

use isomorph_runtime::Application;
use metrics_exporter_prometheus::PrometheusHandle;

/// State shared across all HTTP handlers.
///
/// Cloning is cheap: the application is behind an `Arc` and the Prometheus handle
/// is itself a shared reference.
#[derive(Clone)]
pub struct AppState {
    /// Application every request is dispatched through
    pub app: Arc<Application>,
    /// Prometheus renderer, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State without metrics.
    #[must_use]
    pub const fn new(app: Arc<Application>) -> Self {
        Self { app, metrics: None }
    }

    /// Serve `handle` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("app", &self.app)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isomorph_testing::helpers::server_app;

    #[test]
    fn test_state_is_clone() {
        // Ensure AppState implements Clone (required for Axum)
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn new_state_has_no_metrics() {
        let state = AppState::new(Arc::new(server_app()));
        assert!(state.metrics.is_none());
    }

    #[test]
    fn debug_reports_whether_metrics_are_on() {
        let state = AppState::new(Arc::new(server_app()));
        let rendered = format!("{state:?}");
        assert!(rendered.starts_with("AppState {"));
        assert!(rendered.contains("metrics: false"));
    }
}
