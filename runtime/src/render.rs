//! Rendering the resolved content.
//!
//! On the server the content becomes a full HTML document that embeds the store as a
//! global snapshot:
//!
//! ```text
//! <script>window["APP_STATE"] = {"req":{...},"res":{...}}</script>
//! ```
//!
//! The client renders only the content fragment into its container. Both place the
//! same markup inside the container element, which is what lets the client take over
//! without re-rendering.

use std::fmt::Write as _;
use std::sync::Arc;

use futures::future::BoxFuture;
use isomorph_core::config::CommonConfig;
use isomorph_core::{DispatchError, StateError, Value};

use crate::contents::Content;
use crate::context::Context;
use crate::pipeline::{Handler, HandlerResult, Next};

/// Escape text for HTML bodies and attribute values.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Serialize state for embedding in a `<script>` element.
///
/// `<` is written as `\u003c`, so the payload can never close the script element.
///
/// # Errors
///
/// Returns [`StateError::Serialize`] if serialization fails.
pub fn snapshot_json(state: &Value) -> Result<String, StateError> {
    Ok(serde_json::to_string(state)?.replace('<', "\\u003c"))
}

/// The global's name as a JavaScript string literal, escaped like the payload.
fn snapshot_key(name: &str) -> Result<String, StateError> {
    Ok(serde_json::to_string(name)?.replace('<', "\\u003c"))
}

/// Read the snapshot named `name` back out of a server document.
///
/// # Errors
///
/// Returns [`StateError::InvalidSnapshot`] if the document has no such snapshot and
/// [`StateError::Serialize`] if it is not valid JSON.
pub fn extract_snapshot(document: &str, name: &str) -> Result<Value, StateError> {
    let marker = format!("window[{}] = ", snapshot_key(name)?);
    let start = document.find(&marker).ok_or(StateError::InvalidSnapshot)? + marker.len();
    let mut values = serde_json::Deserializer::from_str(&document[start..]).into_iter::<Value>();
    match values.next() {
        Some(value) => Ok(value?),
        None => Err(StateError::InvalidSnapshot),
    }
}

/// Inner markup of the container element `id` in a server document.
#[must_use]
pub fn extract_container<'d>(document: &'d str, id: &str) -> Option<&'d str> {
    let open = format!("<div id=\"{}\">", escape_html(id));
    let start = document.find(&open)? + open.len();
    let end = document.rfind("</div>")?;
    document.get(start..end)
}

/// Title, description and author of a rendered page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadTags {
    /// Document title
    pub title: String,
    /// Meta description
    pub description: String,
    /// Meta author
    pub author: String,
}

impl HeadTags {
    /// Head fields of `content` for `ctx`.
    #[must_use]
    pub fn for_content(content: &Content, ctx: &Context, common: &CommonConfig) -> Self {
        Self {
            title: content.title(ctx, common),
            description: content.description(ctx, common),
            author: content.author(ctx, common),
        }
    }
}

/// A page ready to be written out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Head fields
    pub head: HeadTags,
    /// Rendered content
    pub body: String,
}

/// Turns a page into the data sent for a dispatch.
pub trait Renderer: Send + Sync {
    /// Produce the response body for `page`.
    ///
    /// # Errors
    ///
    /// Returns error if the page cannot be rendered.
    fn render(&self, ctx: &Context, page: &Page) -> Result<String, DispatchError>;
}

/// Full HTML document with the hydration snapshot.
#[derive(Debug, Clone)]
pub struct DocumentRenderer {
    common: CommonConfig,
}

impl DocumentRenderer {
    /// Renderer using the site settings in `common`.
    #[must_use]
    pub const fn new(common: CommonConfig) -> Self {
        Self { common }
    }
}

impl Renderer for DocumentRenderer {
    fn render(&self, ctx: &Context, page: &Page) -> Result<String, DispatchError> {
        let response = ctx.response();
        let mut html = String::with_capacity(page.body.len() + 512);

        html.push_str("<!DOCTYPE html>");
        let _ = write!(html, "<html lang=\"{}\"><head>", escape_html(&self.common.lang));
        html.push_str("<meta charset=\"utf-8\">");
        let _ = write!(html, "<title>{}</title>", escape_html(&page.head.title));
        let _ = write!(
            html,
            "<meta name=\"description\" content=\"{}\">",
            escape_html(&page.head.description)
        );
        let _ = write!(
            html,
            "<meta name=\"author\" content=\"{}\">",
            escape_html(&page.head.author)
        );
        html.push_str(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
        );
        html.push_str("</head><body>");
        let _ = write!(
            html,
            "<div id=\"{}\">{}</div>",
            escape_html(response.container_element_id()),
            page.body
        );

        if let Some(store) = response.store() {
            let state = snapshot_json(&store.get_state())?;
            let key = snapshot_key(response.app_state_name())?;
            let _ = write!(html, "<script>window[{key}] = {state}</script>");
        }
        for script in &self.common.scripts {
            let _ = write!(html, "<script src=\"{}\"></script>", escape_html(script));
        }
        html.push_str("</body></html>");
        Ok(html)
    }
}

/// Only the content markup, for the client container.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentRenderer;

impl Renderer for FragmentRenderer {
    fn render(&self, _ctx: &Context, page: &Page) -> Result<String, DispatchError> {
        Ok(page.body.clone())
    }
}

/// Renders the resolved content and sends it.
///
/// The page's [`HeadTags`] are left in the context extensions for hosts that manage a
/// document head. Without content the middleware just continues, so the application
/// terminal answers with 404. In error mode it renders nothing and leaves the response
/// to the error handler.
#[derive(Clone)]
pub struct RenderMiddleware {
    renderer: Arc<dyn Renderer>,
    common: CommonConfig,
}

impl RenderMiddleware {
    /// Middleware rendering through `renderer`.
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, common: CommonConfig) -> Self {
        Self { renderer, common }
    }
}

impl std::fmt::Debug for RenderMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderMiddleware").finish_non_exhaustive()
    }
}

impl Handler<Context> for RenderMiddleware {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if next.error().is_some() {
                next.run(ctx).await;
                return Ok(());
            }
            let content = ctx.response().content().cloned();
            if let (Some(content), false) = (content, ctx.response().is_sent()) {
                let page = Page {
                    head: HeadTags::for_content(&content, ctx, &self.common),
                    body: content.body(ctx),
                };
                let data = self.renderer.render(ctx, &page)?;
                ctx.extensions_mut().insert(page.head);
                ctx.send(data).await?;
            }
            next.run(ctx).await;
            Ok(())
        })
    }
}
