//! Path routing.
//!
//! Routes are matched segment by segment in registration order and the first match
//! wins. Patterns support literal segments, `:name` captures and a `*` wildcard that
//! lets the path run longer than the pattern. A pattern may also be longer than the
//! path; only the segments the path has are compared.
//!
//! Resolution never fails to produce a route. When nothing matches, the first of
//! `/404`, `/home`, `/` or the first registered route that resolves is used with
//! status 404, and an empty route is the last resort.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use isomorph_core::DispatchError;
use isomorph_core::status::{NOT_FOUND, OK};
use parking_lot::RwLock;

use crate::contents::Content;
use crate::context::Context;
use crate::error::RouterError;
use crate::pipeline::{FnHandler, Handler, HandlerResult, Next};

/// Rewrites a matched route per request.
pub trait RouteAction: Send + Sync {
    /// Return the route to use for this dispatch.
    fn resolve<'a>(
        &'a self,
        ctx: &'a Context,
        route: Route,
    ) -> BoxFuture<'a, Result<Route, DispatchError>>;
}

/// Closure adapter for [`RouteAction`].
pub struct ActionFn<F>(pub F);

impl<F> RouteAction for ActionFn<F>
where
    F: for<'a> Fn(&'a Context, Route) -> BoxFuture<'a, Result<Route, DispatchError>>
        + Send
        + Sync,
{
    fn resolve<'a>(
        &'a self,
        ctx: &'a Context,
        route: Route,
    ) -> BoxFuture<'a, Result<Route, DispatchError>> {
        (self.0)(ctx, route)
    }
}

/// Wrap a closure as a shared [`RouteAction`].
pub fn action_fn<F>(f: F) -> Arc<dyn RouteAction>
where
    F: for<'a> Fn(&'a Context, Route) -> BoxFuture<'a, Result<Route, DispatchError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ActionFn(f))
}

/// A registered path and what it resolves to.
#[derive(Clone, Default)]
pub struct Route {
    /// Pattern, e.g. `/posts/:id`
    pub path: String,
    /// Name of the content in the registry
    pub content_name: Option<String>,
    /// Content attached directly, taking precedence over `content_name`
    pub content: Option<Arc<Content>>,
    /// Status set by resolution
    pub status: Option<u16>,
    /// Captured `:name` segments
    pub params: BTreeMap<String, String>,
    /// Path that was requested
    pub request_path: Option<String>,
    /// Per-route resolver
    pub action: Option<Arc<dyn RouteAction>>,
    /// Per-route handler, run by the router middleware instead of continuing directly
    pub handler: Option<Arc<dyn Handler<Context>>>,
}

impl Route {
    /// A route for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Resolve content by name.
    #[must_use]
    pub fn with_content_name(mut self, name: impl Into<String>) -> Self {
        self.content_name = Some(name.into());
        self
    }

    /// Attach content directly.
    #[must_use]
    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(Arc::new(content));
        self
    }

    /// Set an explicit status for exact matches.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a per-route resolver.
    #[must_use]
    pub fn with_action(mut self, action: Arc<dyn RouteAction>) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach a per-route handler.
    #[must_use]
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: Handler<Context> + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Attach a per-route handler from a closure.
    #[must_use]
    pub fn with_handler_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.with_handler(FnHandler(f))
    }

    /// Look up a captured parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("content_name", &self.content_name)
            .field("has_content", &self.content.is_some())
            .field("status", &self.status)
            .field("params", &self.params)
            .field("request_path", &self.request_path)
            .field("has_action", &self.action.is_some())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

fn strip_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

/// Match `path` against `pattern`, returning the captured parameters.
///
/// The root path only matches a root pattern or one containing a `*` segment, so a
/// request for `/` is not swallowed by every route through prefix tolerance.
#[must_use]
pub fn match_path(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern = strip_trailing_slash(pattern);
    let path = strip_trailing_slash(path);

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    if path.is_empty() && !pattern.is_empty() && !pattern_segments.contains(&"*") {
        return None;
    }

    let mut params = BTreeMap::new();
    let mut wildcard = false;

    for (segment, actual) in pattern_segments.iter().zip(path_segments.iter()) {
        if *segment == "*" {
            wildcard = true;
        } else if let Some(name) = segment.strip_prefix(':') {
            if actual.is_empty() {
                return None;
            }
            params.insert(name.to_string(), (*actual).to_string());
        } else if segment != actual {
            return None;
        }
    }

    if !wildcard && path_segments.len() > pattern_segments.len() {
        return None;
    }
    Some(params)
}

/// Ordered route table with fallback resolution.
#[derive(Default)]
pub struct Router {
    routes: RwLock<Vec<Route>>,
    action: RwLock<Option<Arc<dyn RouteAction>>>,
}

impl Router {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A router over `routes`; later duplicates of a path are ignored.
    #[must_use]
    pub fn with_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let router = Self::new();
        for route in routes {
            if let Err(error) = router.add(route) {
                tracing::debug!(error = %error, "Skipping duplicate route");
            }
        }
        router
    }

    /// Register a route.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicatePath`] if a route with the same literal path is
    /// already registered.
    pub fn add(&self, route: Route) -> Result<(), RouterError> {
        let mut routes = self.routes.write();
        if routes.iter().any(|existing| existing.path == route.path) {
            return Err(RouterError::DuplicatePath(route.path));
        }
        tracing::debug!(path = %route.path, "Route registered");
        routes.push(route);
        Ok(())
    }

    /// Replace the route with the same path, or append it. Returns the replaced route.
    pub fn replace(&self, route: Route) -> Option<Route> {
        let mut routes = self.routes.write();
        match routes.iter_mut().find(|existing| existing.path == route.path) {
            Some(existing) => Some(std::mem::replace(existing, route)),
            None => {
                routes.push(route);
                None
            },
        }
    }

    /// Remove the route registered for `path`.
    pub fn remove(&self, path: &str) -> Option<Route> {
        let mut routes = self.routes.write();
        let index = routes.iter().position(|route| route.path == path)?;
        Some(routes.remove(index))
    }

    /// Registered routes in priority order.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        self.routes.read().clone()
    }

    /// Install the router-wide action, run after any per-route action.
    pub fn set_action(&self, action: Option<Arc<dyn RouteAction>>) {
        *self.action.write() = action;
    }

    /// First route matching `path`, with its parameters captured.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<Route> {
        let routes = self.routes.read();
        routes.iter().find_map(|route| {
            match_path(&route.path, path).map(|params| Route {
                params,
                ..route.clone()
            })
        })
    }

    /// Resolve `path` to a route, falling back as described in the module docs.
    #[must_use]
    pub fn get_route(&self, path: &str) -> Route {
        if let Some(route) = self.find(path) {
            let status = route.status.unwrap_or(OK);
            return Route {
                status: Some(status),
                request_path: Some(path.to_string()),
                ..route
            };
        }

        let first_path = self.routes.read().first().map(|route| route.path.clone());
        let fallback = ["/404", "/home", "/"]
            .into_iter()
            .find_map(|candidate| self.find(candidate))
            .or_else(|| first_path.and_then(|first| self.find(&first)))
            .unwrap_or_default();

        tracing::debug!(path, fallback = %fallback.path, "No route matched, using fallback");
        Route {
            status: Some(NOT_FOUND),
            request_path: Some(path.to_string()),
            ..fallback
        }
    }

    /// Resolve the route for `ctx`, running the per-route action and then the
    /// router-wide action.
    ///
    /// # Errors
    ///
    /// Propagates the error of a failing action.
    pub async fn resolve(&self, ctx: &Context) -> Result<Route, DispatchError> {
        let mut route = self.get_route(&ctx.request().path);
        if let Some(action) = route.action.clone() {
            route = action.resolve(ctx, route).await?;
        }
        let global = self.action.read().clone();
        if let Some(action) = global {
            route = action.resolve(ctx, route).await?;
        }
        Ok(route)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self.routes.read().iter().map(|r| r.path.clone()).collect();
        f.debug_struct("Router")
            .field("routes", &paths)
            .field("has_action", &self.action.read().is_some())
            .finish()
    }
}

/// Resolves the route, sets the status and hands over to the route's handler.
///
/// In error mode nothing is resolved and the route handler is not called.
#[derive(Debug, Clone)]
pub struct RouterMiddleware {
    router: Arc<Router>,
}

impl RouterMiddleware {
    /// Middleware over `router`.
    #[must_use]
    pub const fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl Handler<Context> for RouterMiddleware {
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
            let route = self.router.resolve(ctx).await?;

            let code = match ctx.response().status_code() {
                Some(code) if code != OK => code,
                _ => route.status.unwrap_or(OK),
            };
            ctx.status(code, None);

            let handler = route.handler.clone();
            if route.content.is_some() {
                ctx.response_mut().set_content(route.content.clone());
            }
            ctx.response_mut().set_route(route);

            match handler {
                Some(handler) => handler.call(ctx, next).await,
                None => {
                    next.run(ctx).await;
                    Ok(())
                },
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::{ContextBuilder, RawRequest, RawResponse};
    use isomorph_core::config::CommonConfig;
    use proptest::prelude::*;

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

    fn context(url: &str) -> Context {
        ContextBuilder::new(CommonConfig::default())
            .normalize(RawRequest::get(url), Box::new(Discard))
    }

    fn router(paths: &[&str]) -> Router {
        Router::with_routes(paths.iter().map(|path| Route::new(*path)))
    }

    #[test]
    fn literal_param_and_wildcard_segments() {
        assert!(match_path("/about", "/about").is_some());
        assert!(match_path("/about/", "/about").is_some());
        assert!(match_path("/about", "/contact").is_none());

        let params = match_path("/posts/:id", "/posts/42").unwrap();
        assert_eq!(params["id"], "42");
        let bare = match_path("/posts/:id", "/posts/").unwrap();
        assert!(!bare.contains_key("id"));
        assert!(match_path("/posts/:id/edit", "/posts//edit").is_none());

        assert!(match_path("/files/*", "/files/a/b/c").is_some());
        assert!(match_path("/files", "/files/a").is_none());
    }

    #[test]
    fn longer_pattern_is_tolerated() {
        let params = match_path("/posts/:id/:slug", "/posts/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert!(!params.contains_key("slug"));
    }

    #[test]
    fn root_only_matches_root_or_wildcard() {
        assert!(match_path("/", "/").is_some());
        assert!(match_path("/home", "/").is_none());
        assert!(match_path("/*", "/").is_some());
    }

    #[test]
    fn first_registration_wins() {
        let router = Router::with_routes([
            Route::new("/posts/:id").with_content_name("post"),
            Route::new("/posts/new").with_content_name("editor"),
        ]);
        let route = router.get_route("/posts/new");
        assert_eq!(route.content_name.as_deref(), Some("post"));
        assert_eq!(route.param("id"), Some("new"));
        assert_eq!(route.status, Some(200));
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let router = router(&["/a"]);
        assert!(matches!(
            router.add(Route::new("/a")),
            Err(RouterError::DuplicatePath(path)) if path == "/a"
        ));
        assert_eq!(router.routes().len(), 1);
    }

    #[test]
    fn replace_and_remove() {
        let router = router(&["/a", "/b"]);
        let old = router.replace(Route::new("/a").with_content_name("new"));
        assert!(old.is_some());
        assert_eq!(router.routes()[0].content_name.as_deref(), Some("new"));

        assert!(router.replace(Route::new("/c")).is_none());
        assert_eq!(router.routes().len(), 3);

        assert!(router.remove("/b").is_some());
        assert!(router.remove("/b").is_none());
    }

    #[test]
    fn fallback_chain_order() {
        let cases: &[(&[&str], &str)] = &[
            (&["/first", "/", "/home", "/404"], "/404"),
            (&["/first", "/", "/home"], "/home"),
            (&["/first", "/"], "/"),
            (&["/first", "/second"], "/first"),
        ];
        for (paths, expected) in cases {
            let route = router(paths).get_route("/missing/page");
            assert_eq!(route.path, *expected);
            assert_eq!(route.status, Some(404));
            assert_eq!(route.request_path.as_deref(), Some("/missing/page"));
        }
    }

    #[test]
    fn empty_router_yields_empty_not_found_route() {
        let route = Router::new().get_route("/anything");
        assert_eq!(route.path, "");
        assert_eq!(route.status, Some(404));
    }

    #[test]
    fn explicit_status_on_exact_match() {
        let router = Router::with_routes([Route::new("/gone").with_status(410)]);
        assert_eq!(router.get_route("/gone").status, Some(410));
    }

    #[tokio::test]
    async fn actions_run_per_route_then_global() {
        let router = Router::with_routes([Route::new("/posts/:id").with_action(action_fn(
            |_ctx, route| {
                Box::pin(async move {
                    let name = format!("post-{}", route.param("id").unwrap_or_default());
                    Ok(route.with_content_name(name))
                })
            },
        ))]);
        router.set_action(Some(action_fn(|ctx, mut route| {
            Box::pin(async move {
                route.params.insert("method".to_string(), ctx.request().method.clone());
                Ok(route)
            })
        })));

        let route = router.resolve(&context("/posts/7")).await.unwrap();
        assert_eq!(route.content_name.as_deref(), Some("post-7"));
        assert_eq!(route.param("method"), Some("GET"));
    }

    #[tokio::test]
    async fn failing_action_propagates() {
        let router = Router::with_routes([Route::new("/").with_action(action_fn(|_ctx, _route| {
            Box::pin(async move { Err(DispatchError::new("lookup failed")) })
        }))]);
        let error = router.resolve(&context("/")).await.unwrap_err();
        assert_eq!(error.message(), "lookup failed");
    }

    proptest! {
        #[test]
        fn registered_literals_resolve_to_themselves(
            segments in prop::collection::btree_set("[a-z]{1,8}", 1..6),
        ) {
            let paths: Vec<String> = segments.iter().map(|s| format!("/{s}")).collect();
            let router = Router::with_routes(paths.iter().map(Route::new));
            for path in &paths {
                let route = router.get_route(path);
                prop_assert_eq!(&route.path, path);
                prop_assert_eq!(route.status, Some(200));
            }
            let missing = router.get_route("/0-not-registered");
            prop_assert_eq!(missing.status, Some(404));
            let expected = if segments.contains("home") { "/home" } else { paths[0].as_str() };
            prop_assert_eq!(missing.path.as_str(), expected);
        }
    }
}
