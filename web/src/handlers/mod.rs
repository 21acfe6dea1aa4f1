//! HTTP handlers served next to the application.
//!
//! Everything else falls through to [`crate::transport::dispatch`].

pub mod health;
pub mod metrics;

// Re-export common handler utilities
pub use health::health_check;
pub use metrics::metrics_endpoint;
