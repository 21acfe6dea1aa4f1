//! Access logging and the built-in `log` content.

use futures::future::BoxFuture;
use isomorph_core::Value;

use crate::contents::Content;
use crate::context::Context;
use crate::pipeline::{Handler, HandlerResult, Next};
use crate::render::escape_html;

/// Name of the built-in content that renders the access line.
pub const LOG_CONTENT: &str = "log";

/// Fields of one access line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessLine {
    /// Request timestamp in milliseconds
    pub timestamp: String,
    /// Peer address
    pub remote_address: String,
    /// Transport version
    pub http_version: String,
    /// Request method
    pub method: String,
    /// Request url
    pub url: String,
    /// Status code, empty when unset
    pub status: String,
    /// Error message, or the status message when there is none
    pub message: String,
}

impl std::fmt::Display for AccessLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let url = if self.url.is_empty() { "/" } else { &self.url };
        write!(
            f,
            "[LOG] [{} - {}] HTTP:{} {} {} -> [{}] {}",
            self.timestamp,
            self.remote_address,
            self.http_version,
            self.method,
            url,
            self.status,
            self.message
        )
    }
}

/// Access line built from the live request and response.
#[must_use]
pub fn access_line(ctx: &Context, error: Option<&str>) -> AccessLine {
    let request = ctx.request();
    let response = ctx.response();
    AccessLine {
        timestamp: request.timestamp.to_string(),
        remote_address: request.remote_address.clone(),
        http_version: request.http_version.clone(),
        method: request.method.clone(),
        url: request.url.clone(),
        status: response
            .status_code()
            .map(|code| code.to_string())
            .unwrap_or_default(),
        message: error
            .or_else(|| response.error_message())
            .or_else(|| response.status_message())
            .unwrap_or_default()
            .to_string(),
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Access line built from the store's `req` and `res` slices, falling back to the
/// live request and response for anything the store doesn't hold.
///
/// Rendering from the store keeps the server document and the hydrated client in
/// agreement.
#[must_use]
pub fn state_line(ctx: &Context) -> AccessLine {
    let live = access_line(ctx, None);
    let Some(store) = ctx.response().store() else {
        return live;
    };
    let field = |path: &str| text_of(store.get_state_at(path).as_ref());

    AccessLine {
        timestamp: field("req.timestamp").unwrap_or(live.timestamp),
        remote_address: field("req.remoteAddress").unwrap_or(live.remote_address),
        http_version: field("req.httpVersion").unwrap_or(live.http_version),
        method: field("req.method").unwrap_or(live.method),
        url: field("req.url").unwrap_or(live.url),
        status: field("res.statusCode").unwrap_or(live.status),
        message: field("res.errorMessage")
            .filter(|message| !message.is_empty())
            .or_else(|| field("res.statusMessage"))
            .unwrap_or(live.message),
    }
}

/// The `log` content: renders the access line from the store.
#[must_use]
pub fn log_content() -> Content {
    Content::computed(|ctx| {
        format!(
            "<div class=\"isomorph-log\"><div>{}</div></div>",
            escape_html(&state_line(ctx).to_string())
        )
    })
}

#[derive(Clone)]
struct LoggedLine(String);

/// Emits one access line per dispatch after the rest of the chain has run.
///
/// The line is emitted on target `isomorph::access`. The same line is not logged
/// twice for one dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl Handler<Context> for AccessLog {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let error = next.error().map(|error| error.diagnostic());
            next.run(ctx).await;

            let line = access_line(ctx, error.as_deref());
            let text = line.to_string();
            let repeated = ctx
                .extensions()
                .get::<LoggedLine>()
                .is_some_and(|logged| logged.0 == text);
            if repeated {
                return Ok(());
            }

            tracing::info!(
                target: "isomorph::access",
                timestamp = %line.timestamp,
                remote_address = %line.remote_address,
                http_version = %line.http_version,
                method = %line.method,
                url = %line.url,
                status = %line.status,
                "{text}"
            );
            ctx.extensions_mut().insert(LoggedLine(text));
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::{ContextBuilder, RawRequest, RawResponse};
    use crate::store::Store;
    use isomorph_core::action::Action;
    use isomorph_core::composition::SliceReducers;
    use isomorph_core::config::CommonConfig;
    use isomorph_core::{DispatchError, StateMap};
    use serde_json::json;

    struct Discard;

    impl RawResponse for Discard {
        fn set_status(&mut self, _code: u16, _reason: Option<&str>) {}
        fn header(&self, _name: &str) -> Option<String> {
            None
        }
        fn set_header(&mut self, _name: &str, _value: &str) {}
        fn remove_header(&mut self, _name: &str) {}
        fn end(&mut self, _body: String) {}
    }

    fn context() -> Context {
        let raw = RawRequest {
            timestamp: Some(1_700_000_000_000),
            socket_address: Some("203.0.113.9".to_string()),
            ..RawRequest::get("/about?x=1")
        };
        ContextBuilder::new(CommonConfig::default()).normalize(raw, Box::new(Discard))
    }

    #[test]
    fn line_format() {
        let mut ctx = context();
        ctx.status(404, None);
        assert_eq!(
            access_line(&ctx, None).to_string(),
            "[LOG] [1700000000000 - 203.0.113.9] HTTP:1.1 GET /about?x=1 -> [404] Not found"
        );
    }

    #[test]
    fn error_takes_precedence() {
        let mut ctx = context();
        let error = DispatchError::named("TypeError", "boom");
        ctx.status(500, Some(&error));
        let line = access_line(&ctx, Some("stack trace"));
        assert_eq!(line.status, "500");
        assert_eq!(line.message, "stack trace");
        assert_eq!(access_line(&ctx, None).message, "TypeError: boom");
    }

    #[test]
    fn state_line_prefers_store_values() {
        let mut ctx = context();
        ctx.status(200, None);
        let store = Store::new(SliceReducers::request_response(), StateMap::new());
        store.dispatch(&Action::set("res", "statusCode", json!(404)));
        store.dispatch(&Action::set("res", "statusMessage", json!("Not found")));
        ctx.response_mut().set_store(store);

        let line = state_line(&ctx);
        assert_eq!(line.status, "404");
        assert_eq!(line.message, "Not found");
        assert_eq!(line.method, "GET");
    }

    #[test]
    fn log_content_escapes_markup() {
        let raw = RawRequest::get("/<script>");
        let ctx = ContextBuilder::new(CommonConfig::default()).normalize(raw, Box::new(Discard));
        let body = log_content().body(&ctx);
        assert!(body.contains("/&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }
}
