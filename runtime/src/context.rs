//! Canonical request/response context.
//!
//! [`ContextBuilder::normalize`] turns a platform [`RawRequest`] and a [`RawResponse`]
//! sink into a [`Context`] holding the canonical [`Request`] and [`Response`]. The sink
//! is moved into exactly one response, so it is decorated once per connection.
//!
//! `Response::status` and [`Context::send`] are no-ops once the response is finalized,
//! and report that through their return value. Sending runs the nested send pipeline
//! before the bytes are flushed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::HeaderMap;
use isomorph_core::config::CommonConfig;
use isomorph_core::environment::{Clock, SystemClock};
use isomorph_core::request::{
    self, Request, is_http1, parse_query, protocol_for, remote_address, split_url,
};
use isomorph_core::status::StatusLine;
use isomorph_core::{DispatchError, Map, StateError, Value};

use crate::contents::Content;
use crate::pipeline::{Middleware, Pipeline, PipelineContext, Terminal};
use crate::router::Route;
use crate::store::Store;

/// The platform's response primitive.
///
/// Implementations write to a socket, a buffered HTTP response, or a client-side
/// container element.
pub trait RawResponse: Send + Sync {
    /// Set the status line. `reason` is only given on HTTP/1.x.
    fn set_status(&mut self, code: u16, reason: Option<&str>);

    /// Read a response header.
    fn header(&self, name: &str) -> Option<String>;

    /// Set a response header.
    fn set_header(&mut self, name: &str, value: &str);

    /// Remove a response header.
    fn remove_header(&mut self, name: &str);

    /// Write the body and finish the response.
    fn end(&mut self, body: String);

    /// Whether the peer went away.
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Platform-specific request data, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    /// Method as received
    pub method: String,
    /// Request target: path, query and (client only) hash
    pub url: String,
    /// Transport version, e.g. `1.1` or `2`
    pub http_version: String,
    /// Request headers
    pub headers: HeaderMap,
    /// HTTP/2 `:authority`
    pub authority: Option<String>,
    /// Host known to the platform
    pub hostname: Option<String>,
    /// Declared protocol, e.g. `http` or `https:`
    pub protocol: Option<String>,
    /// Whether the transport is encrypted
    pub secure: bool,
    /// Peer socket address
    pub socket_address: Option<String>,
    /// Preset timestamp in milliseconds; the builder's clock is used when absent
    pub timestamp: Option<i64>,
}

impl RawRequest {
    /// A `GET` for `url` over HTTP/1.1.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            http_version: "1.1".to_string(),
            ..Self::default()
        }
    }

    /// Add a header, ignoring names or values that are not valid HTTP.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Read a header as text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Data handed to [`Context::send`], inspected by send middlewares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendData {
    /// Body
    pub data: String,
    /// File extension deciding the content type, `html` when absent
    pub extension: Option<String>,
    /// Last modification time of the underlying resource
    pub modified: Option<DateTime<Utc>>,
    /// Size of the underlying resource in bytes
    pub size: Option<u64>,
    /// Character set for text content
    pub charset: Option<String>,
    /// Leave `Content-Length` to the transport
    pub skip_content_length: bool,
}

impl From<String> for SendData {
    fn from(data: String) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

impl From<&str> for SendData {
    fn from(data: &str) -> Self {
        Self::from(data.to_string())
    }
}

/// Canonical response.
pub struct Response {
    status: StatusLine,
    error_message: Option<String>,
    sended: bool,
    content: Option<Arc<Content>>,
    route: Option<Route>,
    store: Option<Store>,
    container_element_id: String,
    app_state_name: String,
    send_data: Option<SendData>,
    send_failure: Option<DispatchError>,
    http1: bool,
    raw: Box<dyn RawResponse>,
}

impl Response {
    fn new(raw: Box<dyn RawResponse>, http1: bool, common: &CommonConfig) -> Self {
        Self {
            status: StatusLine::default(),
            error_message: None,
            sended: false,
            content: None,
            route: None,
            store: None,
            container_element_id: common.container_element_id.clone(),
            app_state_name: common.app_state_name.clone(),
            send_data: None,
            send_failure: None,
            http1,
            raw,
        }
    }

    /// Whether the response has been finalized. An aborted peer counts as finalized.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sended || self.raw.is_aborted()
    }

    fn finalized(&mut self) -> bool {
        if !self.sended && self.raw.is_aborted() {
            tracing::debug!("Peer aborted, response finalized");
            self.sended = true;
        }
        self.sended
    }

    /// Set the status code and derive its message.
    ///
    /// Returns `false`, changing nothing, once the response is finalized.
    pub fn status(&mut self, code: u16, error: Option<&DispatchError>) -> bool {
        if self.finalized() {
            return false;
        }
        self.status = self.status.transition(code, error);
        let reason = if self.http1 {
            self.status.message.as_deref()
        } else {
            None
        };
        self.raw.set_status(code, reason);
        true
    }

    /// Set a custom status message for the current code.
    ///
    /// Returns `false` once the response is finalized.
    pub fn set_status_message(&mut self, message: impl Into<String>) -> bool {
        if self.finalized() {
            return false;
        }
        self.status.message = Some(message.into());
        true
    }

    /// Restore a status line without touching the platform response.
    pub(crate) fn restore_status(
        &mut self,
        status: StatusLine,
        error_message: Option<String>,
    ) -> bool {
        if self.finalized() {
            return false;
        }
        self.status = status;
        self.error_message = error_message;
        true
    }

    /// Status code, unset until something sets it.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status.code
    }

    /// Status message.
    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status.message.as_deref()
    }

    /// Error message exposed to content.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Set the error message exposed to content.
    pub fn set_error_message(&mut self, message: Option<String>) {
        self.error_message = message;
    }

    /// Resolved content.
    #[must_use]
    pub const fn content(&self) -> Option<&Arc<Content>> {
        self.content.as_ref()
    }

    /// Replace the resolved content.
    pub fn set_content(&mut self, content: Option<Arc<Content>>) {
        self.content = content;
    }

    /// Resolved route.
    #[must_use]
    pub const fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Replace the resolved route.
    pub fn set_route(&mut self, route: Route) {
        self.route = Some(route);
    }

    /// The dispatch store.
    #[must_use]
    pub const fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// Attach the dispatch store.
    pub fn set_store(&mut self, store: Store) {
        self.store = Some(store);
    }

    /// Id of the element content renders into.
    #[must_use]
    pub fn container_element_id(&self) -> &str {
        &self.container_element_id
    }

    /// Name of the global hydration snapshot.
    #[must_use]
    pub fn app_state_name(&self) -> &str {
        &self.app_state_name
    }

    /// Data being sent; set while the send pipeline runs.
    #[must_use]
    pub const fn send_data(&self) -> Option<&SendData> {
        self.send_data.as_ref()
    }

    /// Mutable access to the data being sent.
    pub const fn send_data_mut(&mut self) -> Option<&mut SendData> {
        self.send_data.as_mut()
    }

    /// Read a response header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.raw.header(name)
    }

    /// Set a response header. Ignored once finalized.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if !self.is_sent() {
            self.raw.set_header(name, value);
        }
    }

    /// Remove a response header. Ignored once finalized.
    pub fn remove_header(&mut self, name: &str) {
        if !self.is_sent() {
            self.raw.remove_header(name);
        }
    }

    /// Write `body` directly, bypassing the send pipeline, and finalize.
    ///
    /// Returns `false` if the response was already finalized.
    pub fn end(&mut self, body: String) -> bool {
        if self.finalized() {
            return false;
        }
        self.raw.end(body);
        self.sended = true;
        true
    }

    /// The response as a JSON object, as stored in the `res` slice.
    #[must_use]
    pub fn state_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("statusCode".to_string(), self.status.code.map_or(Value::Null, Value::from));
        fields.insert(
            "statusMessage".to_string(),
            self.status.message.clone().map_or(Value::Null, Value::from),
        );
        fields.insert(
            "errorMessage".to_string(),
            self.error_message.clone().map_or(Value::Null, Value::from),
        );
        fields.insert(
            "containerElementId".to_string(),
            Value::from(self.container_element_id.clone()),
        );
        fields.insert("appStateName".to_string(), Value::from(self.app_state_name.clone()));
        fields
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("error_message", &self.error_message)
            .field("sended", &self.sended)
            .field("route", &self.route.as_ref().map(|route| route.path.as_str()))
            .finish_non_exhaustive()
    }
}

/// One dispatch: canonical request and response plus per-dispatch extensions.
pub struct Context {
    request: Request,
    response: Response,
    raw_request: RawRequest,
    extensions: http::Extensions,
    send_pipeline: Arc<Pipeline<Context>>,
}

impl Context {
    /// Canonical request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable canonical request.
    pub const fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Canonical response.
    #[must_use]
    pub const fn response(&self) -> &Response {
        &self.response
    }

    /// Mutable canonical response.
    pub const fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// The request as the platform delivered it.
    #[must_use]
    pub const fn raw_request(&self) -> &RawRequest {
        &self.raw_request
    }

    /// Per-dispatch typed data shared between middlewares.
    #[must_use]
    pub const fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    /// Mutable per-dispatch typed data.
    pub const fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// Shorthand for `response_mut().status(..)`.
    pub fn status(&mut self, code: u16, error: Option<&DispatchError>) -> bool {
        self.response.status(code, error)
    }

    /// Send `data` through the send pipeline and flush it.
    ///
    /// Returns `Ok(true)` when this call finalized the response and `Ok(false)` when it
    /// was already finalized or a send middleware chose not to flush.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing send middleware; nothing is flushed then.
    pub async fn send(&mut self, data: impl Into<SendData>) -> Result<bool, DispatchError> {
        if self.response.finalized() {
            return Ok(false);
        }
        self.response.send_data = Some(data.into());
        self.response.send_failure = None;

        let pipeline = Arc::clone(&self.send_pipeline);
        pipeline.execute(self, &Flush).await;

        match self.response.send_failure.take() {
            Some(failure) => Err(failure),
            None => Ok(self.response.sended),
        }
    }

    /// Send `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if `value` cannot be serialized or a send middleware fails.
    pub async fn send_json<T>(&mut self, value: &T) -> Result<bool, DispatchError>
    where
        T: serde::Serialize + ?Sized,
    {
        let data = serde_json::to_string(value)?;
        self.send(SendData {
            data,
            extension: Some("json".to_string()),
            ..SendData::default()
        })
        .await
    }

    /// The request as a JSON object, as stored in the `req` slice.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Serialize`] if serialization fails.
    pub fn request_fields(&self) -> Result<Map<String, Value>, StateError> {
        self.request.state_fields()
    }
}

impl PipelineContext for Context {
    fn handler_failed(&mut self, error: &DispatchError) {
        self.response.status(500, Some(error));
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// Terminal of the send pipeline: flush the buffered data.
struct Flush;

impl Terminal<Context> for Flush {
    fn finish<'a>(
        &'a self,
        ctx: &'a mut Context,
        error: Option<DispatchError>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(error) = error {
                tracing::warn!(error = %error, "Send middleware failed, nothing flushed");
                ctx.response.send_failure = Some(error);
                return;
            }
            let body = ctx
                .response
                .send_data
                .take()
                .map(|data| data.data)
                .unwrap_or_default();
            ctx.response.end(body);
        })
    }
}

/// Builds a [`Context`] per dispatch.
#[derive(Clone)]
pub struct ContextBuilder {
    clock: Arc<dyn Clock>,
    common: CommonConfig,
    send_pipeline: Arc<Pipeline<Context>>,
}

impl ContextBuilder {
    /// Builder using the system clock and an empty send pipeline.
    #[must_use]
    pub fn new(common: CommonConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            common,
            send_pipeline: Arc::new(Pipeline::new()),
        }
    }

    /// Use `clock` for request timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register (or replace) a named send middleware.
    pub fn send_middleware(
        &mut self,
        name: impl Into<String>,
        middleware: Middleware<Context>,
    ) -> &mut Self {
        Arc::make_mut(&mut self.send_pipeline).insert(name, middleware);
        self
    }

    /// The send pipeline.
    #[must_use]
    pub fn send_pipeline(&self) -> &Pipeline<Context> {
        &self.send_pipeline
    }

    /// Normalize a platform request/response pair.
    #[must_use]
    pub fn normalize(&self, raw: RawRequest, sink: Box<dyn RawResponse>) -> Context {
        let http_version = if raw.http_version.is_empty() {
            "1.1".to_string()
        } else {
            raw.http_version.clone()
        };
        let url = if raw.url.is_empty() {
            "/".to_string()
        } else {
            raw.url.clone()
        };
        let (path, query) = split_url(&url);
        let path = if path.is_empty() { "/" } else { path };

        let hostname = raw
            .header("host")
            .map(str::to_string)
            .or_else(|| raw.authority.clone())
            .or_else(|| raw.hostname.clone())
            .unwrap_or_default();
        let protocol = protocol_for(&http_version, raw.protocol.as_deref());
        let method = if raw.method.is_empty() {
            "GET".to_string()
        } else {
            raw.method.to_uppercase()
        };

        let request = Request {
            timestamp: raw
                .timestamp
                .unwrap_or_else(|| self.clock.now().timestamp_millis()),
            path: path.to_string(),
            url: url.clone(),
            method,
            secure: raw.secure || protocol == "https",
            protocol,
            hostname,
            remote_address: remote_address(
                raw.header("x-forwarded-for"),
                raw.socket_address.as_deref(),
            ),
            user_agent: raw.header("user-agent").unwrap_or_default().to_string(),
            query: query.map(parse_query).unwrap_or_default(),
            http_version,
        };

        let response = Response::new(sink, is_http1(&request.http_version), &self.common);

        Context {
            request,
            response,
            raw_request: raw,
            extensions: http::Extensions::new(),
            send_pipeline: Arc::clone(&self.send_pipeline),
        }
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("send_pipeline", &self.send_pipeline)
            .finish_non_exhaustive()
    }
}

/// Loopback literal used when no peer address is known.
pub const LOOPBACK: &str = request::LOOPBACK;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Written {
        status: Vec<(u16, Option<String>)>,
        headers: Vec<(String, String)>,
        body: Option<String>,
        aborted: bool,
    }

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Written>>);

    impl RawResponse for Sink {
        fn set_status(&mut self, code: u16, reason: Option<&str>) {
            self.0.lock().status.push((code, reason.map(str::to_string)));
        }
        fn header(&self, name: &str) -> Option<String> {
            self.0
                .lock()
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        }
        fn set_header(&mut self, name: &str, value: &str) {
            self.0.lock().headers.push((name.to_string(), value.to_string()));
        }
        fn remove_header(&mut self, name: &str) {
            self.0.lock().headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        }
        fn end(&mut self, body: String) {
            self.0.lock().body = Some(body);
        }
        fn is_aborted(&self) -> bool {
            self.0.lock().aborted
        }
    }

    struct Fixed;

    impl Clock for Fixed {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default()
        }
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(CommonConfig::default()).with_clock(Arc::new(Fixed))
    }

    #[test]
    fn normalizes_request_fields() {
        let raw = RawRequest::get("/shop/items?page=2&sort=asc")
            .with_header("host", "example.com:8080")
            .with_header("x-forwarded-for", "198.51.100.7, 10.1.1.1")
            .with_header("user-agent", "probe/1.0");
        let ctx = builder().normalize(raw, Box::new(Sink::default()));
        let request = ctx.request();

        assert_eq!(request.timestamp, 1_700_000_000_000);
        assert_eq!(request.path, "/shop/items");
        assert_eq!(request.url, "/shop/items?page=2&sort=asc");
        assert_eq!(request.method, "GET");
        assert_eq!(request.hostname, "example.com:8080");
        assert_eq!(request.protocol, "http");
        assert!(!request.secure);
        assert_eq!(request.remote_address, "10.1.1.1");
        assert_eq!(request.user_agent, "probe/1.0");
        assert_eq!(request.query["page"], "2");
    }

    #[test]
    fn http2_is_secure_and_uses_authority() {
        let raw = RawRequest {
            http_version: "2".to_string(),
            authority: Some("example.com".to_string()),
            socket_address: Some("192.0.2.4".to_string()),
            ..RawRequest::get("/")
        };
        let ctx = builder().normalize(raw, Box::new(Sink::default()));
        assert_eq!(ctx.request().protocol, "https");
        assert!(ctx.request().secure);
        assert_eq!(ctx.request().hostname, "example.com");
        assert_eq!(ctx.request().remote_address, "192.0.2.4");
    }

    #[test]
    fn falls_back_to_loopback() {
        let ctx = builder().normalize(RawRequest::get("/"), Box::new(Sink::default()));
        assert_eq!(ctx.request().remote_address, LOOPBACK);
    }

    #[test]
    fn status_mirrors_reason_on_http1_only() {
        let sink = Sink::default();
        let mut ctx = builder().normalize(RawRequest::get("/"), Box::new(sink.clone()));
        assert!(ctx.status(404, None));
        assert_eq!(ctx.response().status_message(), Some("Not found"));

        let h2 = Sink::default();
        let raw = RawRequest {
            http_version: "2".to_string(),
            ..RawRequest::get("/")
        };
        let mut ctx2 = builder().normalize(raw, Box::new(h2.clone()));
        ctx2.status(404, None);
        assert_eq!(ctx2.response().status_message(), Some("Not found"));

        assert_eq!(sink.0.lock().status, vec![(404, Some("Not found".to_string()))]);
        assert_eq!(h2.0.lock().status, vec![(404, None)]);
    }

    #[tokio::test]
    async fn send_flushes_once() {
        let sink = Sink::default();
        let mut ctx = builder().normalize(RawRequest::get("/"), Box::new(sink.clone()));
        ctx.status(200, None);

        assert!(ctx.send("first").await.unwrap());
        assert!(!ctx.send("second").await.unwrap());
        assert!(!ctx.status(500, None));

        assert_eq!(ctx.response().status_code(), Some(200));
        assert_eq!(ctx.response().status_message(), Some("OK"));
        assert_eq!(sink.0.lock().body.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn send_middlewares_run_before_flush() {
        let mut builder = builder();
        builder.send_middleware(
            "length",
            Middleware::from_fn(|ctx: &mut Context, next| {
                Box::pin(async move {
                    let length = ctx
                        .response()
                        .send_data()
                        .map_or(0, |data| data.data.len())
                        .to_string();
                    ctx.response_mut().set_header("content-length", &length);
                    next.run(ctx).await;
                    Ok(())
                })
            }),
        );
        let sink = Sink::default();
        let mut ctx = builder.normalize(RawRequest::get("/"), Box::new(sink.clone()));

        assert!(ctx.send("hello").await.unwrap());
        let written = sink.0.lock();
        assert_eq!(written.headers, vec![("content-length".to_string(), "5".to_string())]);
        assert_eq!(written.body.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn failing_send_middleware_flushes_nothing() {
        let mut builder = builder();
        builder.send_middleware(
            "broken",
            Middleware::from_fn(|_ctx: &mut Context, _next| {
                Box::pin(async move { Err(DispatchError::new("no headers today")) })
            }),
        );
        let sink = Sink::default();
        let mut ctx = builder.normalize(RawRequest::get("/"), Box::new(sink.clone()));

        let error = ctx.send("hello").await.unwrap_err();
        assert_eq!(error.message(), "no headers today");
        assert!(!ctx.response().is_sent());
        assert_eq!(ctx.response().status_code(), Some(500));
        assert!(sink.0.lock().body.is_none());
    }

    #[tokio::test]
    async fn aborted_peer_finalizes() {
        let sink = Sink::default();
        let mut ctx = builder().normalize(RawRequest::get("/"), Box::new(sink.clone()));
        sink.0.lock().aborted = true;

        assert!(ctx.response().is_sent());
        assert!(!ctx.status(200, None));
        assert!(!ctx.send("late").await.unwrap());
        assert!(sink.0.lock().body.is_none());
    }

    #[test]
    fn custom_message_survives_same_code() {
        let mut ctx = builder().normalize(RawRequest::get("/"), Box::new(Sink::default()));
        ctx.status(200, None);
        ctx.response_mut().set_status_message("All good");
        ctx.status(200, None);
        assert_eq!(ctx.response().status_message(), Some("All good"));
    }

    proptest::proptest! {
        #[test]
        fn status_is_locked_after_end(
            first in 100u16..600,
            later in proptest::collection::vec(100u16..600, 1..8),
        ) {
            let sink = Sink::default();
            let mut ctx = builder().normalize(RawRequest::get("/"), Box::new(sink.clone()));
            ctx.status(first, None);
            proptest::prop_assert!(ctx.response_mut().end(String::new()));

            for code in later {
                proptest::prop_assert!(!ctx.status(code, None));
            }
            proptest::prop_assert_eq!(ctx.response().status_code(), Some(first));
            proptest::prop_assert_eq!(sink.0.lock().status.len(), 1);
        }
    }
}
