//! The application: one pipeline answering dispatches on either host.
//!
//! The default stack is registered by name, in this order:
//!
//! | name | middleware |
//! |---|---|
//! | `log` | [`AccessLog`], logs once the rest of the dispatch has finished |
//! | `router` | [`RouterMiddleware`] |
//! | `states` | [`StatesMiddleware`] |
//! | `contents` | [`ContentsMiddleware`] |
//! | `render` | [`RenderMiddleware`] |
//!
//! Middlewares added with [`Application::use_middleware`], [`Application::get`] and
//! [`Application::post`] run in front of `render`, so they see the resolved route and
//! store and may answer the dispatch themselves. When the list is exhausted, an error
//! goes to the error handler and an unanswered dispatch gets a plain 404.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use isomorph_core::config::{Config, Target};
use isomorph_core::environment::Clock;
use isomorph_core::status::NOT_FOUND;
use isomorph_core::DispatchError;

use crate::contents::{ContentManager, ContentRegistry, ContentsMiddleware};
use crate::context::{Context, ContextBuilder, RawRequest, RawResponse};
use crate::error_page::DefaultErrorHandler;
use crate::host::HostScope;
use crate::log::{AccessLog, LOG_CONTENT};
use crate::metrics::DispatchMetrics;
use crate::pipeline::{ErrorHandler, HandlerResult, Middleware, Next, Pipeline, Terminal};
use crate::render::{DocumentRenderer, FragmentRenderer, RenderMiddleware, Renderer};
use crate::router::{Route, Router, RouterMiddleware};
use crate::states::{StateManager, StatesMiddleware};

/// Name of the default render step; user middlewares are placed in front of it.
pub const RENDER: &str = "render";

/// An isomorphic application.
pub struct Application {
    config: Arc<Config>,
    host: Arc<HostScope>,
    builder: ContextBuilder,
    router: Arc<Router>,
    contents: Arc<ContentManager>,
    states: Arc<StatesMiddleware>,
    pipeline: Pipeline<Context>,
    errors: Pipeline<Context>,
}

impl Application {
    /// Application with the default stack and a `/` route showing the `log` content.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_routes(config, [Route::new("/").with_content_name(LOG_CONTENT)])
    }

    /// Application with the default stack and the given routes.
    #[must_use]
    pub fn with_routes(config: Config, routes: impl IntoIterator<Item = Route>) -> Self {
        let common = config.common.clone();
        let host = Arc::new(HostScope::new(config.target));
        let router = Arc::new(Router::with_routes(routes));
        let contents = Arc::new(ContentManager::new());
        let states = Arc::new(StatesMiddleware::new(
            Arc::new(StateManager::new()),
            Arc::clone(&host),
        ));

        let renderer: Arc<dyn Renderer> = match config.target {
            Target::Server => Arc::new(DocumentRenderer::new(common.clone())),
            Target::Client => Arc::new(FragmentRenderer),
        };

        let mut pipeline = Pipeline::new();
        if common.disable_default_middlewares {
            tracing::debug!("Default middlewares disabled");
        } else {
            let registry: Arc<dyn ContentRegistry> = Arc::clone(&contents) as Arc<dyn ContentRegistry>;
            pipeline
                .insert("log", Middleware::handler(AccessLog))
                .insert("router", Middleware::handler(RouterMiddleware::new(Arc::clone(&router))))
                .insert("states", Middleware::Handler(Arc::clone(&states) as _))
                .insert("contents", Middleware::handler(ContentsMiddleware::new(registry)))
                .insert(
                    RENDER,
                    Middleware::handler(RenderMiddleware::new(Arc::clone(&renderer), common.clone())),
                );
        }

        let mut errors = Pipeline::new();
        errors.push(Middleware::error_handler(DefaultErrorHandler::new(
            renderer,
            common.clone(),
            config.is_dev(),
        )));

        Self {
            builder: ContextBuilder::new(common),
            config: Arc::new(config),
            host,
            router,
            contents,
            states,
            pipeline,
            errors,
        }
    }

    /// Use `clock` for request timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.builder = self.builder.with_clock(clock);
        self
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host-wide state.
    #[must_use]
    pub const fn host(&self) -> &Arc<HostScope> {
        &self.host
    }

    /// The router.
    #[must_use]
    pub const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The content registry.
    #[must_use]
    pub const fn contents(&self) -> &Arc<ContentManager> {
        &self.contents
    }

    /// The states middleware.
    #[must_use]
    pub const fn states(&self) -> &Arc<StatesMiddleware> {
        &self.states
    }

    /// The state manager.
    #[must_use]
    pub fn state_manager(&self) -> &Arc<StateManager> {
        self.states.manager()
    }

    /// The application pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline<Context> {
        &self.pipeline
    }

    /// Add a middleware in front of the render step.
    pub fn use_middleware(&mut self, middleware: Middleware<Context>) -> &mut Self {
        self.pipeline.push_before(RENDER, middleware);
        self
    }

    /// Add a closure middleware in front of the render step.
    pub fn use_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.use_middleware(Middleware::from_fn(f))
    }

    /// Register (or replace) a named middleware, e.g. to swap out `render`.
    pub fn insert_middleware(
        &mut self,
        name: impl Into<String>,
        middleware: Middleware<Context>,
    ) -> &mut Self {
        self.pipeline.insert(name, middleware);
        self
    }

    /// Remove a named middleware.
    pub fn remove_middleware(&mut self, name: &str) -> Option<Middleware<Context>> {
        self.pipeline.remove(name)
    }

    /// Handle `GET` requests for exactly `path`.
    pub fn get<F>(&mut self, path: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.method_handler("GET", path.into(), f)
    }

    /// Handle `POST` requests for exactly `path`.
    pub fn post<F>(&mut self, path: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.method_handler("POST", path.into(), f)
    }

    fn method_handler<F>(&mut self, method: &'static str, path: String, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.use_fn(move |ctx, next| {
            if ctx.request().method == method && ctx.request().path == path {
                f(ctx, next)
            } else {
                Box::pin(async move {
                    next.run(ctx).await;
                    Ok(())
                })
            }
        })
    }

    /// Register (or replace) a named send middleware.
    pub fn send_middleware(
        &mut self,
        name: impl Into<String>,
        middleware: Middleware<Context>,
    ) -> &mut Self {
        self.builder.send_middleware(name, middleware);
        self
    }

    /// Replace the handler for errors that reach the end of the pipeline.
    pub fn set_error_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: ErrorHandler<Context> + 'static,
    {
        let mut errors = Pipeline::new();
        errors.push(Middleware::error_handler(handler));
        self.errors = errors;
        self
    }

    /// Run one dispatch and return its context.
    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(target = %self.config.target, method = %raw.method, url = %raw.url)
    )]
    pub async fn handle(&self, raw: RawRequest, sink: Box<dyn RawResponse>) -> Context {
        let started = Instant::now();
        let mut ctx = self.builder.normalize(raw, sink);

        self.pipeline.execute(&mut ctx, &Finish { app: self }).await;

        let target = match self.config.target {
            Target::Server => "server",
            Target::Client => "client",
        };
        DispatchMetrics::record_dispatch(target, started.elapsed());
        tracing::debug!(
            status = ctx.response().status_code(),
            sent = ctx.response().is_sent(),
            "Dispatch finished"
        );
        ctx
    }

    /// Run the error handler for `error`.
    pub async fn handle_error(&self, ctx: &mut Context, error: DispatchError) {
        self.errors.execute_with(ctx, Some(error), &Unhandled).await;
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("target", &self.config.target)
            .field("pipeline", &self.pipeline)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Terminal of the application pipeline.
struct Finish<'a> {
    app: &'a Application,
}

impl Terminal<Context> for Finish<'_> {
    fn finish<'b>(&'b self, ctx: &'b mut Context, error: Option<DispatchError>) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            if let Some(error) = error {
                self.app.handle_error(ctx, error).await;
                return;
            }
            if ctx.response().is_sent() {
                return;
            }

            DispatchMetrics::record_not_found();
            ctx.status(NOT_FOUND, None);
            let body = format!("{} {}", ctx.request().method, ctx.request().url);
            if let Err(error) = ctx.send(body).await {
                tracing::warn!(error = %error, "Sending the 404 fallback failed");
            }
        })
    }
}

/// Terminal of the error pipeline: whatever is left was not handled.
struct Unhandled;

impl Terminal<Context> for Unhandled {
    fn finish<'a>(&'a self, ctx: &'a mut Context, error: Option<DispatchError>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(error) = error {
                tracing::error!(
                    error = %error.diagnostic(),
                    url = %ctx.request().url,
                    "Unhandled dispatch error"
                );
            }
        })
    }
}
