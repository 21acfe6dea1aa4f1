//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden by `HOST` and `PORT`, then
//! validated.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! metrics = true
//! shutdown_timeout_secs = 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Listener and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Plain HTTP port
    pub port: u16,
    /// TLS port; recorded for applications, not bound here
    pub port_ssl: u16,
    /// Serve the Prometheus exposition on `/metrics`
    pub metrics: bool,
    /// How long in-flight requests get after a shutdown signal
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            port_ssl: 443,
            metrics: false,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ParseConfig`] on malformed TOML.
    pub fn from_toml_str(source: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(source)?)
    }

    /// Load from `path` (if any), apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, if `PORT` is not a port
    /// number, or if validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ServerError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let source =
                    std::fs::read_to_string(path).map_err(|source| ServerError::ReadConfig {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_toml_str(&source)?
            },
            None => Self::default(),
        };

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ServerError::ValidationError(format!("PORT is not a port: {port}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ValidationError`] for an empty host, a zero port or a
    /// zero shutdown timeout.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::ValidationError("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ServerError::ValidationError("port must be > 0".to_string()));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ServerError::ValidationError(
                "shutdown_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Grace period after a shutdown signal.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
