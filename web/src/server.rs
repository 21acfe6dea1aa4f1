//! Server bootstrap and lifecycle.
//!
//! [`Server::bind`] opens the listener, [`Server::serve`] runs until a shutdown is
//! requested through a [`ShutdownHandle`], a process signal arrives, or the fatal
//! panic hook fires. In-flight requests get the configured grace period.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::routing::get;
use isomorph_runtime::Application;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers::{health_check, metrics_endpoint};
use crate::state::AppState;
use crate::transport::dispatch;

/// Why the server stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// [`ShutdownHandle::shutdown`] was called
    Requested,
    /// Ctrl+C or SIGTERM
    Signal,
    /// The fatal hook fired with this message
    Fatal(String),
}

/// Cloneable trigger for a graceful shutdown. The first reason given wins.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// A handle that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.trigger(ShutdownReason::Requested);
    }

    /// Shut down because the process can no longer be trusted.
    pub fn fatal(&self, message: impl Into<String>) {
        self.trigger(ShutdownReason::Fatal(message.into()));
    }

    fn trigger(&self, reason: ShutdownReason) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// The reason, once fired.
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.tx.borrow().clone()
    }

    /// Wait until the handle fires.
    pub async fn triggered(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ShutdownReason::Requested;
            }
        }
    }
}

static FATAL_HOOK: OnceLock<ShutdownHandle> = OnceLock::new();

/// Install a panic hook that turns any panic into a fatal shutdown of `handle`.
///
/// The previous hook still runs first. Only the first call installs anything;
/// later calls return `false`.
pub fn install_fatal_hook(handle: &ShutdownHandle) -> bool {
    if FATAL_HOOK.set(handle.clone()).is_err() {
        return false;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let message = panic_message(info);
        tracing::error!(%message, "Process-fatal panic, shutting down");
        if let Some(handle) = FATAL_HOOK.get() {
            handle.fatal(message);
        }
    }));
    true
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string());
    match info.location() {
        Some(location) => format!("{payload} at {location}"),
        None => payload,
    }
}

/// A bound HTTP server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    router: axum::Router,
    shutdown: ShutdownHandle,
    grace: Duration,
}

impl Server {
    /// Bind the listener for `config`.
    ///
    /// With a Prometheus handle the exposition is served on `/metrics`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(
        config: &ServerConfig,
        app: Arc<Application>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let addr = config.addr();
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let state = AppState { app, metrics };
        Ok(Self {
            listener,
            router: Self::router(state),
            shutdown: ShutdownHandle::new(),
            grace: config.shutdown_timeout(),
        })
    }

    /// The axum router: `/health`, `/metrics` when enabled, and the application as
    /// the fallback.
    #[must_use]
    pub fn router(state: AppState) -> axum::Router {
        let mut router = axum::Router::new().route("/health", get(health_check));
        if state.metrics.is_some() {
            router = router.route("/metrics", get(metrics_endpoint));
        }
        router
            .fallback(dispatch)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
            .with_state(state)
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Serve)
    }

    /// Handle that stops this server.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] if the accept loop fails, or
    /// [`ServerError::Fatal`] if the shutdown was fatal.
    pub async fn serve(self) -> Result<(), ServerError> {
        let Self {
            listener,
            router,
            shutdown,
            grace,
        } = self;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Server listening");
        }

        let serving = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .into_future();

        let deadline = async {
            shutdown.triggered().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serving => result.map_err(ServerError::Serve)?,
            () = deadline => {
                tracing::warn!(grace_secs = grace.as_secs(), "Connections still open after the grace period, closing");
            },
        }

        match shutdown.reason() {
            Some(ShutdownReason::Fatal(message)) => Err(ServerError::Fatal(message)),
            reason => {
                tracing::info!(?reason, "Server stopped");
                Ok(())
            },
        }
    }
}

async fn wait_for_shutdown(handle: ShutdownHandle) {
    tokio::select! {
        reason = handle.triggered() => {
            tracing::info!(?reason, "Shutting down gracefully...");
        },
        () = shutdown_signal() => {
            handle.trigger(ShutdownReason::Signal);
        },
    }
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let handle = ShutdownHandle::new();
        assert_eq!(handle.reason(), None);

        handle.fatal("boom");
        handle.shutdown();

        assert_eq!(handle.reason(), Some(ShutdownReason::Fatal("boom".to_string())));
    }

    #[test]
    fn triggered_resolves_for_earlier_trigger() {
        let handle = ShutdownHandle::new();
        handle.shutdown();
        let reason = tokio_test::block_on(handle.triggered());
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn triggered_wakes_waiters() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.triggered().await });

        handle.shutdown();

        assert_eq!(task.await.unwrap(), ShutdownReason::Requested);
    }
}
