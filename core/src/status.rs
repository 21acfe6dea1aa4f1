//! Status codes and the default status message table.

use crate::error::DispatchError;

/// 200
pub const OK: u16 = 200;
/// 304
pub const NOT_MODIFIED: u16 = 304;
/// 404
pub const NOT_FOUND: u16 = 404;
/// 500
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Status message used for a 500 without an error value.
pub const GENERIC_ERROR_MESSAGE: &str = "Error: Internal Server Error";

/// The status line a response holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    /// Status code, unset until something sets it
    pub code: Option<u16>,
    /// Reason phrase
    pub message: Option<String>,
}

impl StatusLine {
    /// Compute the status line that results from setting `code`.
    ///
    /// - 200, 304 and 404 get `OK`, `Not modified` and `Not found`.
    /// - 500 gets `name: message` from `error` when one is given, else the generic
    ///   message.
    /// - A custom message survives when the code does not change (an error on a 500
    ///   still wins).
    /// - Other codes have no default message.
    #[must_use]
    pub fn transition(&self, code: u16, error: Option<&DispatchError>) -> Self {
        let kept = if self.code == Some(code) {
            self.message.clone()
        } else {
            None
        };

        let message = match (code, error) {
            (INTERNAL_SERVER_ERROR, Some(error)) => Some(error.to_string()),
            _ => kept.or_else(|| default_message(code).map(str::to_string)),
        };

        Self {
            code: Some(code),
            message,
        }
    }
}

/// Default message for a status code.
#[must_use]
pub const fn default_message(code: u16) -> Option<&'static str> {
    match code {
        OK => Some("OK"),
        NOT_MODIFIED => Some("Not modified"),
        NOT_FOUND => Some("Not found"),
        INTERNAL_SERVER_ERROR => Some(GENERIC_ERROR_MESSAGE),
        _ => None,
    }
}
