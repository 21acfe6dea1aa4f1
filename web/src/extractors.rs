//! Custom Axum extractors.
//!
//! [`HostRequest`] turns the parts of an incoming HTTP request into the
//! platform-neutral [`RawRequest`] the runtime normalizes.
//!
//! # Examples
//!
//! ```ignore
//! use axum::extract::State;
//! use isomorph_web::{AppState, HostRequest};
//!
//! async fn handler(State(state): State<AppState>, HostRequest(raw): HostRequest) {
//!     tracing::info!(method = %raw.method, url = %raw.url, "Dispatching");
//! }
//! ```

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{Version, request::Parts},
};
use isomorph_runtime::RawRequest;

/// Header set by TLS-terminating proxies.
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The request as the runtime sees it.
#[derive(Debug, Clone)]
pub struct HostRequest(pub RawRequest);

#[async_trait]
impl<S> FromRequestParts<S> for HostRequest
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(raw_request(parts)))
    }
}

/// Build a [`RawRequest`] from request parts.
///
/// The socket address comes from axum's `ConnectInfo`, which is only present when
/// the router is served with `into_make_service_with_connect_info`.
#[must_use]
pub fn raw_request(parts: &Parts) -> RawRequest {
    let url = parts
        .uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |target| target.as_str().to_string());

    let forwarded = parts
        .headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_ascii_lowercase());
    let protocol = forwarded.or_else(|| parts.uri.scheme_str().map(str::to_string));
    let secure = protocol.as_deref() == Some("https");

    RawRequest {
        method: parts.method.as_str().to_string(),
        url,
        http_version: version_name(parts.version).to_string(),
        headers: parts.headers.clone(),
        authority: parts.uri.authority().map(|authority| authority.as_str().to_string()),
        hostname: None,
        protocol,
        secure,
        socket_address: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
        timestamp: None,
    }
}

/// Transport version as the runtime names it.
#[must_use]
pub const fn version_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}
