//! # Isomorph Testing
//!
//! Testing utilities and helpers for isomorph applications.
//!
//! This crate provides:
//! - A fixed clock, so rendered timestamps and snapshots are deterministic
//! - [`RecordingSink`], a response sink that remembers what was written to it
//! - Request builders and application constructors for both hosts
//! - Property-based strategies for paths and patterns
//! - [`ReducerTest`], a Given-When-Then helper for slice reducers
//!
//! ## Example
//!
//! ```ignore
//! use isomorph_testing::{RecordingSink, helpers, requests};
//!
//! #[tokio::test]
//! async fn root_shows_the_log() {
//!     let app = helpers::server_app();
//!     let sink = RecordingSink::new();
//!
//!     app.handle(requests::get("/"), sink.sink()).await;
//!
//!     assert_eq!(sink.status(), Some(200));
//!     assert!(sink.body().unwrap().contains("isomorph-log"));
//! }
//! ```

use chrono::{DateTime, Utc};
use isomorph_core::environment::Clock;

pub mod reducer_test;

pub use reducer_test::ReducerTest;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use isomorph_testing::mocks::FixedClock;
    /// use isomorph_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Response sinks that record what a dispatch wrote.
pub mod sinks {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use isomorph_runtime::RawResponse;
    use parking_lot::Mutex;

    /// Everything written to a [`RecordingSink`].
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Recorded {
        /// Last status code set
        pub status: Option<u16>,
        /// Reason phrase given with it
        pub reason: Option<String>,
        /// Headers, keyed by lower-case name
        pub headers: BTreeMap<String, String>,
        /// Body of the first `end`
        pub body: Option<String>,
        /// Number of `end` calls
        pub end_calls: usize,
    }

    /// A shareable sink; clones record into the same place.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink {
        recorded: Arc<Mutex<Recorded>>,
        aborted: bool,
    }

    impl RecordingSink {
        /// Empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Sink whose peer has gone away.
        #[must_use]
        pub fn aborted() -> Self {
            Self {
                aborted: true,
                ..Self::default()
            }
        }

        /// Boxed handle for [`Application::handle`](isomorph_runtime::Application::handle).
        #[must_use]
        pub fn sink(&self) -> Box<dyn RawResponse> {
            Box::new(self.clone())
        }

        /// A copy of the recording.
        #[must_use]
        pub fn recorded(&self) -> Recorded {
            self.recorded.lock().clone()
        }

        /// Last status code.
        #[must_use]
        pub fn status(&self) -> Option<u16> {
            self.recorded.lock().status
        }

        /// Reason phrase sent with the status.
        #[must_use]
        pub fn reason(&self) -> Option<String> {
            self.recorded.lock().reason.clone()
        }

        /// Body, once ended.
        #[must_use]
        pub fn body(&self) -> Option<String> {
            self.recorded.lock().body.clone()
        }

        /// A header value.
        #[must_use]
        pub fn header(&self, name: &str) -> Option<String> {
            self.recorded
                .lock()
                .headers
                .get(&name.to_ascii_lowercase())
                .cloned()
        }

        /// How often the response was ended.
        #[must_use]
        pub fn end_calls(&self) -> usize {
            self.recorded.lock().end_calls
        }
    }

    impl RawResponse for RecordingSink {
        fn set_status(&mut self, code: u16, reason: Option<&str>) {
            let mut recorded = self.recorded.lock();
            recorded.status = Some(code);
            recorded.reason = reason.map(str::to_string);
        }

        fn header(&self, name: &str) -> Option<String> {
            Self::header(self, name)
        }

        fn set_header(&mut self, name: &str, value: &str) {
            self.recorded
                .lock()
                .headers
                .insert(name.to_ascii_lowercase(), value.to_string());
        }

        fn remove_header(&mut self, name: &str) {
            self.recorded
                .lock()
                .headers
                .remove(&name.to_ascii_lowercase());
        }

        fn end(&mut self, body: String) {
            let mut recorded = self.recorded.lock();
            recorded.end_calls += 1;
            if recorded.body.is_none() {
                recorded.body = Some(body);
            }
        }

        fn is_aborted(&self) -> bool {
            self.aborted
        }
    }
}

/// Raw request builders.
pub mod requests {
    use isomorph_runtime::RawRequest;

    /// Host used by the builders.
    pub const TEST_HOST: &str = "example.test";

    /// `GET url` over HTTP/1.1 with a `Host` header.
    #[must_use]
    pub fn get(url: &str) -> RawRequest {
        RawRequest::get(url).with_header("host", TEST_HOST)
    }

    /// `POST url` with a body-less request.
    #[must_use]
    pub fn post(url: &str) -> RawRequest {
        RawRequest {
            method: "POST".to_string(),
            ..get(url)
        }
    }

    /// `GET url` over HTTP/2 with `:authority` instead of `Host`.
    #[must_use]
    pub fn get_http2(url: &str) -> RawRequest {
        RawRequest {
            http_version: "2".to_string(),
            authority: Some(TEST_HOST.to_string()),
            ..RawRequest::get(url)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::sync::Arc;

    use isomorph_core::config::{Config, Globals, Target};
    use isomorph_runtime::{Application, Route};

    use crate::mocks::test_clock;

    /// Globals used by the app constructors: `WAPP=test`, not dev.
    #[must_use]
    pub fn test_globals() -> Globals {
        Globals {
            wapp: "test".to_string(),
            ..Globals::default()
        }
    }

    /// Server application with the default routes and the test clock.
    #[must_use]
    pub fn server_app() -> Application {
        Application::new(Config::new(Target::Server, test_globals()))
            .with_clock(Arc::new(test_clock()))
    }

    /// Application for `target` with `routes` and the test clock.
    #[must_use]
    pub fn app_with_routes(target: Target, routes: impl IntoIterator<Item = Route>) -> Application {
        Application::with_routes(Config::new(target, test_globals()), routes)
            .with_clock(Arc::new(test_clock()))
    }

    /// Install a test-writer tracing subscriber once; later calls are no-ops.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// A lower-case path segment that never collides with the fallback names.
    pub fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,8}".prop_filter("fallback names are reserved", |s| {
            !matches!(s.as_str(), "home" | "404")
        })
    }

    /// An absolute path of one to four segments.
    pub fn path() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..=4).prop_map(|segments| format!("/{}", segments.join("/")))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
pub use sinks::RecordingSink;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use isomorph_runtime::RawResponse;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn recording_sink_keeps_first_body() {
        let sink = RecordingSink::new();
        let mut handle = sink.sink();
        handle.set_status(201, Some("Created"));
        handle.set_header("X-Test", "1");
        handle.end("first".to_string());
        handle.end("second".to_string());

        assert_eq!(sink.status(), Some(201));
        assert_eq!(sink.reason().as_deref(), Some("Created"));
        assert_eq!(sink.header("x-test").as_deref(), Some("1"));
        assert_eq!(sink.body().as_deref(), Some("first"));
        assert_eq!(sink.end_calls(), 2);
    }

    #[test]
    fn http2_request_uses_authority() {
        let raw = requests::get_http2("/a");
        assert_eq!(raw.http_version, "2");
        assert!(raw.header("host").is_none());
        assert_eq!(raw.authority.as_deref(), Some(requests::TEST_HOST));
    }
}
