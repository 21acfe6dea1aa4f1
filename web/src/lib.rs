//! Axum transport for isomorph applications.
//!
//! The runtime crate knows nothing about sockets. This crate turns every HTTP
//! request into a [`RawRequest`](isomorph_runtime::RawRequest), runs it through an
//! [`Application`](isomorph_runtime::Application), and turns what the application
//! wrote into an axum response.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at the axum fallback
//! 2. **[`HostRequest`]** extracts method, target, version, headers and peer address
//! 3. **Dispatch** runs the application pipeline against an [`HttpSink`]
//! 4. **Send middlewares** ([`send`]) add caching headers or answer 304
//! 5. **Response** is built from the sink's buffered status, headers and body
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use isomorph_core::config::{Config, Target};
//! use isomorph_runtime::Application;
//! use isomorph_web::{Server, ServerConfig, send};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut app = Application::new(Config::from_env(Target::Server)?);
//! send::register(&mut app);
//!
//! let server = Server::bind(&ServerConfig::default(), Arc::new(app), None).await?;
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod send;
pub mod server;
pub mod state;
pub mod transport;

// Re-export key types for convenience
pub use config::ServerConfig;
pub use error::ServerError;
pub use extractors::HostRequest;
pub use server::{Server, ShutdownHandle, ShutdownReason, install_fatal_hook};
pub use state::AppState;
pub use transport::{HttpSink, dispatch};
