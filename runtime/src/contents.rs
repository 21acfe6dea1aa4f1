//! Page contents and their registry.
//!
//! A [`Content`] knows how to render the body and head of a page. Fields are either
//! fixed text or computed from the dispatch [`Context`]. Missing head fields fall back
//! to defaults derived from the response status and the site configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use isomorph_core::DispatchError;
use isomorph_core::config::CommonConfig;
use isomorph_core::status::{INTERNAL_SERVER_ERROR, NOT_FOUND};
use parking_lot::RwLock;

use crate::context::Context;
use crate::log;
use crate::pipeline::{Handler, HandlerResult, Next};

/// A function computing a field from the context.
pub type Computed = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// A content field.
#[derive(Clone)]
pub enum Field {
    /// Fixed text
    Text(String),
    /// Computed per dispatch
    Computed(Computed),
}

impl Field {
    /// A computed field.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// The field's value for `ctx`.
    #[must_use]
    pub fn resolve(&self, ctx: &Context) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Computed(f) => f(ctx),
        }
    }
}

impl From<&str> for Field {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Field {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Data loading hook awaited before rendering.
pub trait ContentRequest: Send + Sync {
    /// Load whatever the content needs, typically recording it in the store.
    fn request<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// Closure adapter for [`ContentRequest`].
pub struct RequestFn<F>(pub F);

impl<F> ContentRequest for RequestFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> + Send + Sync,
{
    fn request<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> {
        (self.0)(ctx)
    }
}

/// A renderable page.
#[derive(Clone)]
pub struct Content {
    /// Body markup
    pub render: Field,
    /// Page title; derived from the status when absent
    pub title: Option<Field>,
    /// Meta description; the title without the site name when absent
    pub description: Option<Field>,
    /// Meta author; the site name when absent
    pub author: Option<Field>,
    /// Hint for renderers, e.g. `html`
    pub render_type: Option<String>,
    /// Data loading hook
    pub request: Option<Arc<dyn ContentRequest>>,
}

impl Content {
    /// Content rendering `render`.
    pub fn new(render: impl Into<Field>) -> Self {
        Self {
            render: render.into(),
            title: None,
            description: None,
            author: None,
            render_type: None,
            request: None,
        }
    }

    /// Content computing its body per dispatch.
    pub fn computed<F>(render: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        Self::new(Field::computed(render))
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<Field>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<Field>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<Field>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the render type hint.
    #[must_use]
    pub fn with_render_type(mut self, render_type: impl Into<String>) -> Self {
        self.render_type = Some(render_type.into());
        self
    }

    /// Attach a data loading hook.
    #[must_use]
    pub fn with_request<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        self.request = Some(Arc::new(RequestFn(f)));
        self
    }

    /// Rendered body.
    #[must_use]
    pub fn body(&self, ctx: &Context) -> String {
        self.render.resolve(ctx)
    }

    /// Page title.
    #[must_use]
    pub fn title(&self, ctx: &Context, common: &CommonConfig) -> String {
        self.title
            .as_ref()
            .map_or_else(|| default_title(ctx, common), |title| title.resolve(ctx))
    }

    /// Meta description.
    #[must_use]
    pub fn description(&self, ctx: &Context, common: &CommonConfig) -> String {
        if let Some(description) = &self.description {
            return description.resolve(ctx);
        }
        if let Some(description) = &common.description {
            return description.clone();
        }
        let title = self.title(ctx, common);
        title
            .split(" | ")
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Meta author.
    #[must_use]
    pub fn author(&self, ctx: &Context, common: &CommonConfig) -> String {
        self.author.as_ref().map_or_else(
            || common.author.clone().unwrap_or_else(|| common.site_name.clone()),
            |author| author.resolve(ctx),
        )
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("render", &self.render)
            .field("title", &self.title)
            .field("description", &self.description)
            .field("author", &self.author)
            .field("render_type", &self.render_type)
            .field("has_request", &self.request.is_some())
            .finish()
    }
}

/// Title used when content doesn't set one.
#[must_use]
pub fn default_title(ctx: &Context, common: &CommonConfig) -> String {
    let response = ctx.response();
    let title = match response.status_code() {
        Some(NOT_FOUND) => response.status_message().unwrap_or("Not found"),
        Some(INTERNAL_SERVER_ERROR) => response
            .error_message()
            .or_else(|| response.status_message())
            .unwrap_or("Internal Server Error"),
        _ => "Untitled Page",
    };
    format!("{title} | {}", common.site_name)
}

/// Named content lookup.
pub trait ContentRegistry: Send + Sync {
    /// Content registered as `name`.
    fn get(&self, name: &str) -> Option<Arc<Content>>;
}

/// In-memory [`ContentRegistry`]. Starts with the `log` content.
pub struct ContentManager {
    contents: RwLock<HashMap<String, Arc<Content>>>,
}

impl ContentManager {
    /// A registry holding only the `log` content.
    #[must_use]
    pub fn new() -> Self {
        let mut contents = HashMap::new();
        contents.insert(log::LOG_CONTENT.to_string(), Arc::new(log::log_content()));
        Self {
            contents: RwLock::new(contents),
        }
    }

    /// Register `content` under `name`, replacing an existing entry.
    pub fn add(&self, name: impl Into<String>, content: Content) -> &Self {
        let name = name.into();
        tracing::debug!(content = %name, "Content registered");
        self.contents.write().insert(name, Arc::new(content));
        self
    }

    /// Remove the content registered as `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<Content>> {
        self.contents.write().remove(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contents.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ContentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRegistry for ContentManager {
    fn get(&self, name: &str) -> Option<Arc<Content>> {
        self.contents.read().get(name).cloned()
    }
}

impl fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentManager")
            .field("contents", &self.names())
            .finish()
    }
}

/// Resolves the route's content by name and awaits its data hook. Passes through in
/// error mode.
#[derive(Clone)]
pub struct ContentsMiddleware {
    registry: Arc<dyn ContentRegistry>,
}

impl ContentsMiddleware {
    /// Middleware over `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn ContentRegistry>) -> Self {
        Self { registry }
    }
}

impl fmt::Debug for ContentsMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentsMiddleware").finish_non_exhaustive()
    }
}

impl Handler<Context> for ContentsMiddleware {
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
            if ctx.response().content().is_none() {
                let name = ctx
                    .response()
                    .route()
                    .and_then(|route| route.content_name.clone());
                let content = name.as_deref().and_then(|name| self.registry.get(name));
                if name.is_some() && content.is_none() {
                    tracing::warn!(content = ?name, "Route names unknown content");
                }
                ctx.response_mut().set_content(content);
            }

            let hook = ctx
                .response()
                .content()
                .and_then(|content| content.request.clone());
            if let Some(hook) = hook {
                hook.request(ctx).await?;
            }

            next.run(ctx).await;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::{ContextBuilder, RawRequest, RawResponse};
    use crate::pipeline::{Middleware, Pipeline, Terminal};
    use isomorph_core::DispatchError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

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
        ContextBuilder::new(CommonConfig::default())
            .normalize(RawRequest::get("/"), Box::new(Discard))
    }

    /// Records the error the pipeline ended with.
    #[derive(Default)]
    struct Finish(Mutex<Option<String>>);

    impl Terminal<Context> for Finish {
        fn finish<'a>(
            &'a self,
            _ctx: &'a mut Context,
            error: Option<DispatchError>,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                *self.0.lock() = error.map(|error| error.message().to_string());
            })
        }
    }

    fn hooked(called: &Arc<AtomicBool>) -> Arc<Content> {
        let flag = Arc::clone(called);
        Arc::new(Content::new("home").with_request(move |_ctx: &mut Context| {
            flag.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }))
    }

    fn contents() -> Middleware<Context> {
        Middleware::handler(ContentsMiddleware::new(Arc::new(ContentManager::new())))
    }

    #[test]
    fn default_titles_follow_status() {
        let common = CommonConfig::default();
        let content = Content::new("body");

        let mut ctx = context();
        assert_eq!(content.title(&ctx, &common), "Untitled Page | Isomorph");

        ctx.status(404, None);
        assert_eq!(content.title(&ctx, &common), "Not found | Isomorph");

        let mut ctx = context();
        ctx.status(500, Some(&DispatchError::named("TypeError", "x is undefined")));
        assert_eq!(content.title(&ctx, &common), "TypeError: x is undefined | Isomorph");

        ctx.response_mut().set_error_message(Some("Database offline".to_string()));
        assert_eq!(content.title(&ctx, &common), "Database offline | Isomorph");
    }

    #[test]
    fn head_defaults() {
        let common = CommonConfig::default();
        let mut ctx = context();
        ctx.status(404, None);

        let content = Content::new("body");
        assert_eq!(content.description(&ctx, &common), "Not found");
        assert_eq!(content.author(&ctx, &common), "Isomorph");

        let common = CommonConfig {
            description: Some("A shop".to_string()),
            author: Some("Shop Team".to_string()),
            ..CommonConfig::default()
        };
        assert_eq!(content.description(&ctx, &common), "A shop");
        assert_eq!(content.author(&ctx, &common), "Shop Team");
    }

    #[test]
    fn computed_fields_read_the_context() {
        let content = Content::computed(|ctx| format!("<p>{}</p>", ctx.request().path))
            .with_title(Field::computed(|ctx| ctx.request().method.clone()));
        let ctx = context();
        assert_eq!(content.body(&ctx), "<p>/</p>");
        assert_eq!(content.title(&ctx, &CommonConfig::default()), "GET");
    }

    #[test]
    fn manager_starts_with_log_and_replaces() {
        let manager = ContentManager::new();
        assert_eq!(manager.names(), vec!["log".to_string()]);

        manager.add("home", Content::new("one"));
        manager.add("home", Content::new("two"));
        let ctx = context();
        assert_eq!(manager.get("home").unwrap().body(&ctx), "two");
        assert!(manager.remove("home").is_some());
        assert!(manager.get("home").is_none());
    }

    #[tokio::test]
    async fn request_hook_runs_before_render() {
        let called = Arc::new(AtomicBool::new(false));
        let mut ctx = context();
        ctx.response_mut().set_content(Some(hooked(&called)));
        let mut pipeline = Pipeline::new();
        pipeline.push(contents());
        let finish = Finish::default();

        pipeline.execute(&mut ctx, &finish).await;

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(*finish.0.lock(), None);
    }

    #[tokio::test]
    async fn error_mode_skips_the_request_hook() {
        let called = Arc::new(AtomicBool::new(false));
        let mut ctx = context();
        ctx.response_mut().set_content(Some(hooked(&called)));
        let mut pipeline = Pipeline::new();
        pipeline
            .use_fn(|_ctx: &mut Context, _next| {
                Box::pin(async { Err(DispatchError::new("boom")) })
            })
            .push(contents());
        let finish = Finish::default();

        pipeline.execute(&mut ctx, &finish).await;

        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(finish.0.lock().as_deref(), Some("boom"));
        assert_eq!(ctx.response().status_code(), Some(500));
    }
}
