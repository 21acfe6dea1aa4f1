//! The bridge between axum and the application pipeline.
//!
//! The runtime writes through [`RawResponse`]; [`HttpSink`] buffers those writes and
//! becomes an axum response once the dispatch returns.

use std::sync::Arc;

use axum::{body::Body, extract::State, response::Response};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use hyper::ext::ReasonPhrase;
use isomorph_runtime::RawResponse;
use parking_lot::Mutex;

use crate::extractors::HostRequest;
use crate::state::AppState;

#[derive(Debug, Default)]
struct Buffered {
    status: Option<u16>,
    reason: Option<String>,
    headers: HeaderMap,
    body: Option<String>,
}

/// Response sink that buffers status, headers and body.
///
/// Clones share the buffer, so one clone goes into the dispatch and another builds
/// the response afterwards.
#[derive(Debug, Clone, Default)]
pub struct HttpSink {
    buffered: Arc<Mutex<Buffered>>,
}

impl HttpSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the application ended the response.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.buffered.lock().body.is_some()
    }

    /// Build the HTTP response.
    ///
    /// A dispatch that never ended the response answers 500 with an empty body. A
    /// reason phrase that differs from the canonical one is kept for HTTP/1.x peers.
    #[must_use]
    pub fn into_response(self) -> Response {
        let buffered = std::mem::take(&mut *self.buffered.lock());

        let Some(body) = buffered.body else {
            tracing::error!("Dispatch finished without ending the response");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        };

        let status = buffered
            .status
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = buffered.headers;

        if let Some(reason) = buffered.reason {
            if status.canonical_reason() != Some(reason.as_str()) {
                match ReasonPhrase::try_from(reason.into_bytes()) {
                    Ok(phrase) => {
                        response.extensions_mut().insert(phrase);
                    },
                    Err(_) => tracing::debug!("Reason phrase is not valid on the wire, dropped"),
                }
            }
        }

        response
    }
}

impl RawResponse for HttpSink {
    fn set_status(&mut self, code: u16, reason: Option<&str>) {
        let mut buffered = self.buffered.lock();
        buffered.status = Some(code);
        buffered.reason = reason.map(str::to_string);
    }

    fn header(&self, name: &str) -> Option<String> {
        self.buffered
            .lock()
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.buffered.lock().headers.insert(name, value);
            },
            _ => tracing::warn!(header = name, "Invalid response header dropped"),
        }
    }

    fn remove_header(&mut self, name: &str) {
        self.buffered.lock().headers.remove(name);
    }

    fn end(&mut self, body: String) {
        let mut buffered = self.buffered.lock();
        if buffered.body.is_none() {
            buffered.body = Some(body);
        }
    }
}

/// Fallback handler: every request goes through the application.
pub async fn dispatch(State(state): State<AppState>, HostRequest(raw): HostRequest) -> Response {
    let sink = HttpSink::new();
    state.app.handle(raw, Box::new(sink.clone())).await;
    sink.into_response()
}
