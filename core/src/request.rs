//! The canonical request.
//!
//! Both hosts build the same [`Request`] shape: the server from an HTTP exchange,
//! the client from a history location. Field names serialize in camelCase because
//! the request is mirrored into the `req` slice of the hydration snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;

/// Loopback literal used when no peer address is known.
pub const LOOPBACK: &str = "::1";

/// Canonical request, rebuilt at the start of every dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Path without query or hash
    pub path: String,
    /// Path plus query (and hash on the client)
    pub url: String,
    /// Upper-case method
    pub method: String,
    /// `1.1`, `2`, ...
    pub http_version: String,
    /// Host name, including a port when one was given
    pub hostname: String,
    /// `http` or `https`
    pub protocol: String,
    /// Whether the transport is encrypted
    pub secure: bool,
    /// Peer address, see [`remote_address`]
    pub remote_address: String,
    /// `User-Agent` value, empty when absent
    pub user_agent: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
}

impl Request {
    /// Whether the transport is HTTP/1.x.
    #[must_use]
    pub fn is_http1(&self) -> bool {
        is_http1(&self.http_version)
    }

    /// The request as a JSON object, as stored in the `req` slice.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Serialize`] if serialization fails.
    pub fn state_fields(&self) -> Result<Map<String, Value>, StateError> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields),
            _ => Err(StateError::InvalidSnapshot),
        }
    }
}

/// Whether `version` names an HTTP/1.x transport.
#[must_use]
pub fn is_http1(version: &str) -> bool {
    version == "1.1" || version.split('.').next().and_then(|major| major.parse::<u32>().ok()) == Some(1)
}

/// Derive the protocol: HTTP/2 is always treated as `https`.
#[must_use]
pub fn protocol_for(http_version: &str, declared: Option<&str>) -> String {
    if http_version.starts_with('2') {
        return "https".to_string();
    }
    declared
        .filter(|protocol| !protocol.is_empty())
        .map_or_else(|| "http".to_string(), |protocol| protocol.trim_end_matches(':').to_string())
}

/// Derive the peer address.
///
/// The last hop of the `X-Forwarded-For` chain wins, then the socket address, then
/// the loopback literal.
#[must_use]
pub fn remote_address(forwarded_for: Option<&str>, socket: Option<&str>) -> String {
    forwarded_for
        .and_then(|chain| chain.split(',').next_back())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .or_else(|| socket.map(str::trim).filter(|address| !address.is_empty()))
        .unwrap_or(LOOPBACK)
        .to_string()
}

/// Split a URL into its path and raw query.
#[must_use]
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    let without_hash = url.split('#').next().unwrap_or(url);
    match without_hash.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_hash, None),
    }
}

/// Decode a raw query string. Repeated keys keep the last value; malformed input
/// yields an empty map.
#[must_use]
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_uses_last_hop() {
        assert_eq!(
            remote_address(Some("203.0.113.1, 10.0.0.2 , 10.0.0.3 "), Some("127.0.0.1")),
            "10.0.0.3"
        );
        assert_eq!(remote_address(Some(" "), Some("127.0.0.1")), "127.0.0.1");
        assert_eq!(remote_address(None, None), LOOPBACK);
    }

    #[test]
    fn http2_is_https() {
        assert_eq!(protocol_for("2", Some("http")), "https");
        assert_eq!(protocol_for("2.0", None), "https");
        assert_eq!(protocol_for("1.1", Some("http:")), "http");
        assert_eq!(protocol_for("1.1", None), "http");
    }

    #[test]
    fn http1_detection() {
        assert!(is_http1("1.1"));
        assert!(is_http1("1.0"));
        assert!(!is_http1("2"));
        assert!(!is_http1(""));
    }

    #[test]
    fn url_split_and_query_decode() {
        assert_eq!(split_url("/a/b?x=1#top"), ("/a/b", Some("x=1")));
        assert_eq!(split_url("/a"), ("/a", None));

        let query = parse_query("?name=J%C3%B3zsef&tag=a&tag=b&empty=");
        assert_eq!(query["name"], "József");
        assert_eq!(query["tag"], "b");
        assert_eq!(query["empty"], "");
    }

    #[test]
    fn state_fields_are_camel_case() {
        let request = Request {
            http_version: "1.1".to_string(),
            remote_address: LOOPBACK.to_string(),
            ..Request::default()
        };
        let fields = request.state_fields().unwrap();
        assert_eq!(fields["httpVersion"], "1.1");
        assert_eq!(fields["remoteAddress"], LOOPBACK);
        assert!(fields.contains_key("userAgent"));
    }
}
