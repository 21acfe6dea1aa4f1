//! Error types.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Store errors.
///
/// These never escape a dispatch: the store logs them and carries on with the
/// remaining slices and listeners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A canonical reducer found a non-object slice
    #[error("slice `{slice}` holds {found}, expected an object")]
    NotAnObject {
        /// Slice name
        slice: String,
        /// JSON kind found instead
        found: &'static str,
    },

    /// A custom reducer rejected the action
    #[error("reducer for slice `{slice}` failed: {reason}")]
    Reducer {
        /// Slice name
        slice: String,
        /// Reducer-provided reason
        reason: String,
    },

    /// A subscribed listener failed
    #[error("listener failed: {0}")]
    Listener(String),

    /// A hydration snapshot was not a JSON object
    #[error("snapshot is not a JSON object")]
    InvalidSnapshot,

    /// State could not be serialized
    #[error("state could not be serialized: {0}")]
    Serialize(String),
}

impl StateError {
    /// Attach a slice name to a reducer failure that does not carry one yet.
    #[must_use]
    pub fn in_slice(self, slice: &str) -> Self {
        match self {
            Self::Reducer { slice: owner, reason } if owner.is_empty() => Self::Reducer {
                slice: slice.to_string(),
                reason,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialize(error.to_string())
    }
}

/// Error value carried through a middleware pipeline.
///
/// Cheap to clone: a handler failure is handed to every error-aware handler that
/// follows it. Displays as `name: message`, which is also the status message a
/// 500 response derives from it.
///
/// Any [`std::error::Error`] converts into it, so handlers can use `?`:
///
/// ```
/// use isomorph_core::DispatchError;
///
/// fn parse(raw: &str) -> Result<u16, DispatchError> {
///     Ok(raw.parse::<u16>()?)
/// }
///
/// let error = parse("x").unwrap_err();
/// assert_eq!(error.name(), "ParseIntError");
/// ```
#[derive(Clone)]
pub struct DispatchError {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl DispatchError {
    /// An error named `Error`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    /// An error with an explicit name.
    #[must_use]
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                message: message.into(),
                source: None,
            }),
        }
    }

    /// Error name, e.g. `Error` or the source error's type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// The wrapped error, if this value was converted from one.
    #[must_use]
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.inner.source.as_deref()
    }

    /// `name: message` followed by the cause chain, one cause per line.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let mut text = self.to_string();
        let mut cause = self.source_error().and_then(StdError::source);
        while let Some(error) = cause {
            text.push_str("\n  caused by: ");
            text.push_str(&error.to_string());
            cause = error.source();
        }
        text
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.inner.name, self.inner.message)
    }
}

impl fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchError")
            .field("name", &self.inner.name)
            .field("message", &self.inner.message)
            .field("source", &self.inner.source)
            .finish()
    }
}

impl<E> From<E> for DispatchError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: short_type_name::<E>().to_string(),
                message: error.to_string(),
                source: Some(Box::new(error)),
            }),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_is_name_and_message() {
        let error = DispatchError::named("TypeError", "x is undefined");
        assert_eq!(error.to_string(), "TypeError: x is undefined");
        assert_eq!(DispatchError::new("boom").to_string(), "Error: boom");
    }

    #[test]
    fn converted_errors_use_their_type_name() {
        let error: DispatchError = StateError::InvalidSnapshot.into();
        assert_eq!(error.name(), "StateError");
        assert_eq!(error.message(), "snapshot is not a JSON object");
        assert!(error.source_error().is_some());
    }

    #[test]
    fn clones_share_the_same_error() {
        let error = DispatchError::new("boom");
        let copy = error.clone();
        assert!(Arc::ptr_eq(&error.inner, &copy.inner));
    }

    #[test]
    fn slice_is_attached_once() {
        let error = StateError::Reducer {
            slice: String::new(),
            reason: "bad".to_string(),
        };
        let error = error.in_slice("user").in_slice("other");
        assert_eq!(error.to_string(), "reducer for slice `user` failed: bad");
    }
}
