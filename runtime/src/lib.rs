//! # Isomorph Runtime
//!
//! Runtime for isomorphic applications: the same pipeline answers an HTTP request on
//! the server and a history navigation on the client.
//!
//! ## Core Components
//!
//! - **Pipeline**: ordered middleware executor with error mode and named entries
//! - **Context**: platform request/response pairs normalized into [`Context`]
//! - **Router**: path patterns with a deterministic 404 fallback chain
//! - **Store**: per-dispatch reducer store, hydrated from the server snapshot on the client
//! - **Requests**: named JSON data requests recorded into the dispatch store
//! - **Application**: the default stack (`log`, `router`, `states`, `contents`, `render`)
//!
//! ## Example
//!
//! ```ignore
//! use isomorph_core::config::{Config, Globals, Target};
//! use isomorph_runtime::{Application, RawRequest};
//!
//! let app = Application::new(Config::new(Target::Server, Globals::default()));
//! let ctx = app.handle(RawRequest::get("/"), Box::new(sink)).await;
//!
//! assert_eq!(ctx.response().status_code(), Some(200));
//! ```

pub mod app;
pub mod client;
pub mod contents;
pub mod context;
pub mod error_page;
pub mod host;
pub mod log;
pub mod metrics;
pub mod pipeline;
pub mod render;
pub mod requests;
pub mod router;
pub mod states;
pub mod store;

pub use app::Application;
pub use client::{ClientHost, Container, History, Location, Origin};
pub use contents::{Content, ContentManager, ContentRegistry, Field};
pub use context::{Context, ContextBuilder, RawRequest, RawResponse, Response, SendData};
pub use host::HostScope;
pub use pipeline::{ErrorHandler, Handler, HandlerResult, Middleware, Next, Pipeline, Terminal};
pub use requests::{Credentials, DataRequest, RequestManager, RequestOptions};
pub use router::{Route, Router};
pub use states::StateManager;
pub use store::Store;

/// Error types for the runtime
pub mod error {
    use isomorph_core::StateError;
    use isomorph_core::config::Target;
    use thiserror::Error;

    /// Errors from router registration
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RouterError {
        /// A route with this path is already registered
        ///
        /// Use [`Router::replace`](crate::router::Router::replace) to overwrite it.
        #[error("Route already registered: {0}")]
        DuplicatePath(String),
    }

    /// Errors from driving a client host
    #[derive(Error, Debug)]
    pub enum ClientError {
        /// The application was built for another host
        #[error("Application targets the {0}, not the client")]
        WrongTarget(Target),

        /// The server document carries no readable snapshot
        #[error("Cannot read hydration snapshot: {0}")]
        Snapshot(#[from] StateError),
    }

    /// Errors from sending data requests
    #[derive(Error, Debug)]
    pub enum RequestError {
        /// Nothing is registered under this name
        #[error("No data request named {0}")]
        UnknownRequest(String),

        /// The URL cannot be parsed or resolved against the page origin
        #[error("Invalid data request URL {url}: {reason}")]
        InvalidUrl {
            /// URL as registered
            url: String,
            /// Parser message
            reason: String,
        },

        /// The HTTP client cannot be built
        #[error("Cannot build HTTP client: {0}")]
        Client(#[source] reqwest::Error),

        /// The exchange failed before an answer arrived
        #[error("Data request to {url} failed: {source}")]
        Transport {
            /// Resolved URL
            url: String,
            /// Client error
            source: reqwest::Error,
        },

        /// The answer was not a success
        #[error("Data request to {url} answered {status}")]
        Status {
            /// Resolved URL
            url: String,
            /// Status code
            status: u16,
        },

        /// The answer body is not JSON
        #[error("Data request to {url} returned invalid JSON: {source}")]
        Decode {
            /// Resolved URL
            url: String,
            /// Client error
            source: reqwest::Error,
        },
    }
}
