//! Send middlewares for HTTP responses.
//!
//! They run inside [`Context::send`](isomorph_runtime::Context::send), after the body
//! is known and before it is flushed:
//!
//! - [`Headers`] fills in the standard entity headers.
//! - [`Etag`] adds a weak validator when size and modification time are known.
//! - [`NotModified`] answers conditional requests with 304.
//!
//! Headers that are already set are left alone.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use isomorph_runtime::pipeline::{Handler, HandlerResult, Middleware, Next};
use isomorph_runtime::{Application, Context, SendData};

/// Registration name of [`Headers`].
pub const HEADERS: &str = "headers";
/// Registration name of [`Etag`].
pub const ETAG: &str = "etag";
/// Registration name of [`NotModified`].
pub const NOT_MODIFIED: &str = "not_modified";

/// Value of `X-Powered-By`.
pub const POWERED_BY: &str = "Isomorph";

/// Register the three send middlewares, in order.
pub fn register(app: &mut Application) {
    app.send_middleware(HEADERS, Middleware::handler(Headers))
        .send_middleware(ETAG, Middleware::handler(Etag))
        .send_middleware(NOT_MODIFIED, Middleware::handler(NotModified));
}

/// Content type for a file extension.
#[must_use]
pub fn mime_type(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// `IMF-fixdate`, as used by `Last-Modified`.
#[must_use]
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Weak validator from size and modification time, `W/"<size hex>-<mtime ms hex>"`.
///
/// `None` when either is unknown or the size is zero.
#[must_use]
pub fn weak_etag(data: &SendData) -> Option<String> {
    let size = data.size.filter(|size| *size > 0)?;
    let modified = data.modified?;
    Some(format!("W/\"{size:x}-{:x}\"", modified.timestamp_millis()))
}

fn set_missing(ctx: &mut Context, name: &str, value: &str) {
    if ctx.response().header(name).is_none() {
        ctx.response_mut().set_header(name, value);
    }
}

/// `Accept-Ranges`, `Content-Type`, `Content-Length`, `Last-Modified`,
/// `Cache-Control` and `X-Powered-By`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headers;

impl Handler<Context> for Headers {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Some(data) = ctx.response().send_data().cloned() {
                let extension = data.extension.as_deref().unwrap_or("html");
                let mime = mime_type(extension);
                let charset = data
                    .charset
                    .clone()
                    .or_else(|| (mime == "text/html").then(|| "utf-8".to_string()));
                let content_type = match charset {
                    Some(charset) => format!("{mime}; charset={charset}"),
                    None => mime.to_string(),
                };

                set_missing(ctx, "Accept-Ranges", "bytes");
                set_missing(ctx, "Content-Type", &content_type);
                if !data.skip_content_length {
                    set_missing(ctx, "Content-Length", &data.data.len().to_string());
                }
                if let Some(modified) = data.modified {
                    set_missing(ctx, "Last-Modified", &http_date(modified));
                }
                set_missing(ctx, "Cache-Control", "public, max-age=0");
                set_missing(ctx, "X-Powered-By", POWERED_BY);
            }
            next.run(ctx).await;
            Ok(())
        })
    }
}

/// Weak `ETag` when the data carries size and modification time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Etag;

impl Handler<Context> for Etag {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Some(etag) = ctx.response().send_data().and_then(weak_etag) {
                set_missing(ctx, "ETag", &etag);
            }
            next.run(ctx).await;
            Ok(())
        })
    }
}

/// Answers a fresh conditional `GET`/`HEAD` with an empty 304.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotModified;

impl NotModified {
    /// Whether the client's cached copy is still valid.
    ///
    /// `If-None-Match` decides when present. Otherwise `If-Modified-Since` is compared
    /// with `Last-Modified`. `Cache-Control: no-cache` always forces a full response.
    #[must_use]
    pub fn is_fresh(ctx: &Context) -> bool {
        let method = ctx.request().method.as_str();
        if method != "GET" && method != "HEAD" {
            return false;
        }
        let status = ctx.response().status_code().unwrap_or(200);
        if !((200..300).contains(&status) || status == 304) {
            return false;
        }

        let raw = ctx.raw_request();
        let none_match = raw.header("if-none-match");
        let modified_since = raw.header("if-modified-since");
        if none_match.is_none() && modified_since.is_none() {
            return false;
        }
        let no_cache = raw.header("cache-control").is_some_and(|value| {
            value
                .split(',')
                .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
        });
        if no_cache {
            return false;
        }

        if let Some(none_match) = none_match {
            let none_match = none_match.trim();
            if none_match == "*" {
                return true;
            }
            let Some(etag) = ctx.response().header("etag") else {
                return false;
            };
            return none_match
                .split(',')
                .map(str::trim)
                .any(|token| strip_weak(token) == strip_weak(&etag));
        }

        let since = modified_since.and_then(parse_http_date);
        let last = ctx
            .response()
            .header("last-modified")
            .as_deref()
            .and_then(parse_http_date);
        matches!((since, last), (Some(since), Some(last)) if last <= since)
    }
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

impl Handler<Context> for NotModified {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if !Self::is_fresh(ctx) {
                next.run(ctx).await;
                return Ok(());
            }

            ctx.status(304, None);
            for header in ["Content-Type", "Content-Length"] {
                ctx.response_mut().remove_header(header);
            }
            tracing::debug!(
                method = %ctx.request().method,
                url = %ctx.request().url,
                "Not modified"
            );
            metrics::counter!("isomorph_not_modified_total").increment(1);
            ctx.response_mut().end(String::new());
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn data(size: Option<u64>, modified: Option<DateTime<Utc>>) -> SendData {
        SendData {
            size,
            modified,
            ..SendData::from("x")
        }
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_type("html"), "text/html");
        assert_eq!(mime_type(".JSON"), "application/json");
        assert_eq!(mime_type("unknown"), "application/octet-stream");
    }

    #[test]
    fn http_date_format() {
        let time = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&http_date(time)), Some(time));
    }

    #[test]
    fn etag_needs_size_and_mtime() {
        let modified = Utc.timestamp_millis_opt(0x1000).unwrap();
        assert_eq!(
            weak_etag(&data(Some(255), Some(modified))).as_deref(),
            Some("W/\"ff-1000\"")
        );
        assert!(weak_etag(&data(None, Some(modified))).is_none());
        assert!(weak_etag(&data(Some(0), Some(modified))).is_none());
        assert!(weak_etag(&data(Some(3), None)).is_none());
    }

    #[test]
    fn weak_prefix_is_ignored_when_comparing() {
        assert_eq!(strip_weak("W/\"a\""), strip_weak("\"a\""));
    }
}
