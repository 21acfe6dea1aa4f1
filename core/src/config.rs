//! Configuration shared by both hosts.
//!
//! Process globals are read once at bootstrap and passed through untouched.
//! [`CommonConfig`] derives the names that must agree between the server-rendered
//! document and the client that hydrates it: the container element id and the name
//! of the global state snapshot.
//!
//! # Example
//!
//! ```
//! use isomorph_core::config::{CommonConfig, Globals};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let globals = Globals::from_lookup(|key| match key {
//!     "DEV" => Some("true".to_string()),
//!     "WAPP" => Some("a1b2".to_string()),
//!     _ => None,
//! })?;
//! let common = CommonConfig::from_globals(&globals);
//!
//! assert_eq!(common.container_element_id, "isomorph-container-element-id-a1b2");
//! assert_eq!(common.app_state_name, "ISOMORPH_APP_STATE_a1b2");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment value could not be interpreted
    InvalidValue {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
    },
    /// Configuration validation failed
    ValidationError(String),
    /// Failed to parse configuration
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "Invalid value for {key}: {value}"),
            Self::ValidationError(msg) => write!(f, "Configuration validation failed: {msg}"),
            Self::ParseError(msg) => write!(f, "Failed to parse configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which host an application runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Answers HTTP requests
    #[default]
    Server,
    /// Answers history navigations
    Client,
}

impl Target {
    /// Parse a target name.
    ///
    /// # Errors
    ///
    /// Returns error if the name is neither `server` nor `client`
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            _ => Err(ConfigError::InvalidValue {
                key: "TYPE".to_string(),
                value: s.to_string(),
            }),
        }
    }

    /// Check if this is the client host
    #[must_use]
    pub const fn is_client(self) -> bool {
        matches!(self, Self::Client)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Process globals recognised at bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Globals {
    /// `DEV`: dev-only instrumentation
    pub dev: bool,
    /// `WAPP`: build identifier used in generated ids
    pub wapp: String,
    /// `RUN`: activation marker
    pub run: Option<String>,
    /// `TYPE`
    pub kind: Option<String>,
    /// `ROOT`: base directory
    pub root: Option<String>,
    /// `NAME`
    pub name: Option<String>,
}

impl Globals {
    /// Read globals from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if `DEV` is not a boolean
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read globals through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns error if `DEV` is not a boolean
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dev = match lookup("DEV").as_deref().map(str::trim) {
            None | Some("" | "0" | "false") => false,
            Some("1" | "true") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "DEV".to_string(),
                    value: other.to_string(),
                });
            },
        };

        Ok(Self {
            dev,
            wapp: lookup("WAPP").unwrap_or_default(),
            run: lookup("RUN"),
            kind: lookup("TYPE"),
            root: lookup("ROOT"),
            name: lookup("NAME"),
        })
    }
}

/// Settings both hosts must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Site name appended to page titles
    pub site_name: String,
    /// Document language
    pub lang: String,
    /// Default meta description
    pub description: Option<String>,
    /// Default meta author
    pub author: Option<String>,
    /// Id of the element the application renders into
    pub container_element_id: String,
    /// Name of the global hydration snapshot
    pub app_state_name: String,
    /// Script URLs referenced by the server document
    pub scripts: Vec<String>,
    /// Skip the default middleware stack
    pub disable_default_middlewares: bool,
}

impl CommonConfig {
    /// Derive the shared names from the process globals.
    #[must_use]
    pub fn from_globals(globals: &Globals) -> Self {
        let mut config = Self::default();
        if !globals.wapp.is_empty() {
            if globals.dev {
                config.container_element_id =
                    format!("isomorph-container-element-id-{}", globals.wapp);
                config.app_state_name = format!("ISOMORPH_APP_STATE_{}", globals.wapp);
            } else {
                config.container_element_id.clone_from(&globals.wapp);
                config.app_state_name.clone_from(&globals.wapp);
            }
        }
        config
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a name used in the document is empty or unsafe to embed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_element_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "container_element_id cannot be empty".to_string(),
            ));
        }
        if self.app_state_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "app_state_name cannot be empty".to_string(),
            ));
        }
        if self.app_state_name.contains(['"', '\\', '<']) {
            return Err(ConfigError::ValidationError(format!(
                "app_state_name cannot contain quotes, backslashes or '<': {}",
                self.app_state_name
            )));
        }
        Ok(())
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            site_name: "Isomorph".to_string(),
            lang: "en".to_string(),
            description: None,
            author: None,
            container_element_id: "app".to_string(),
            app_state_name: "APP_STATE".to_string(),
            scripts: Vec::new(),
            disable_default_middlewares: false,
        }
    }
}

/// Everything an application needs to be configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Host this application runs on
    pub target: Target,
    /// Process globals
    pub globals: Globals,
    /// Shared settings
    pub common: CommonConfig,
}

impl Config {
    /// Build a configuration for `target` from process globals.
    #[must_use]
    pub fn new(target: Target, globals: Globals) -> Self {
        let common = CommonConfig::from_globals(&globals);
        Self {
            target,
            globals,
            common,
        }
    }

    /// Load from the process environment.
    ///
    /// `TYPE` selects the target when set; otherwise `target` is used.
    ///
    /// # Errors
    ///
    /// Returns error if a global is malformed or validation fails
    pub fn from_env(target: Target) -> Result<Self, ConfigError> {
        let globals = Globals::from_env()?;
        let target = match globals.kind.as_deref() {
            Some(kind) => Target::from_str(kind)?,
            None => target,
        };
        let config = Self::new(target, globals);
        config.common.validate()?;
        Ok(config)
    }

    /// Whether dev-only instrumentation is enabled.
    #[must_use]
    pub const fn is_dev(&self) -> bool {
        self.globals.dev
    }
}
