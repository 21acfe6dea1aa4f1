//! Ordered middleware execution.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] run with chain-of-responsibility
//! semantics. Every handler receives a [`Next`] continuation:
//!
//! - [`Next::run`] advances to the following handler, keeping the current mode.
//! - [`Next::fail`] advances in error mode.
//! - [`Next::resume`] advances in normal mode, dropping a carried error.
//!
//! In error mode, normal handlers are still invoked, but the `Next` they receive keeps
//! carrying the error, so a later error handler still sees it. Error handlers are only
//! invoked in error mode; in normal mode they are skipped. A handler that returns
//! `Err` puts the pipeline in error mode with that error, after
//! [`PipelineContext::handler_failed`] has had a chance to mark the response.
//!
//! When the list is exhausted, the [`Terminal`] is called with the carried error, if any.
//!
//! The cursor lives in per-invocation state, so one pipeline can serve any number of
//! concurrent dispatches.
//!
//! # Example
//!
//! ```
//! use futures::future::BoxFuture;
//! use isomorph_core::DispatchError;
//! use isomorph_runtime::pipeline::{Pipeline, PipelineContext, Terminal};
//!
//! #[derive(Default)]
//! struct Trail(Vec<String>);
//!
//! impl PipelineContext for Trail {
//!     fn handler_failed(&mut self, error: &DispatchError) {
//!         self.0.push(format!("500 {error}"));
//!     }
//! }
//!
//! struct Out;
//!
//! impl Terminal<Trail> for Out {
//!     fn finish<'a>(&'a self, ctx: &'a mut Trail, error: Option<DispatchError>) -> BoxFuture<'a, ()> {
//!         Box::pin(async move { ctx.0.push(format!("out {}", error.is_some())) })
//!     }
//! }
//!
//! let mut pipeline = Pipeline::<Trail>::new();
//! pipeline.use_fn(|ctx: &mut Trail, next| Box::pin(async move {
//!     ctx.0.push("a".to_string());
//!     next.run(ctx).await;
//!     Ok(())
//! }));
//!
//! let mut trail = Trail::default();
//! futures::executor::block_on(pipeline.execute(&mut trail, &Out));
//! assert_eq!(trail.0, vec!["a", "out false"]);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use isomorph_core::DispatchError;

use crate::metrics::DispatchMetrics;

/// What a handler returns.
pub type HandlerResult = Result<(), DispatchError>;

/// Context threaded through a pipeline.
pub trait PipelineContext: Send + 'static {
    /// Called when a handler returns `Err`, before error mode begins.
    fn handler_failed(&mut self, error: &DispatchError);
}

/// A normal handler.
pub trait Handler<C>: Send + Sync {
    /// Handle `ctx`, continuing through `next` when appropriate.
    fn call<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, HandlerResult>;
}

/// An error-aware handler, invoked only in error mode.
pub trait ErrorHandler<C>: Send + Sync {
    /// Handle `error`. The `next` continuation still carries it.
    fn call<'a>(
        &'a self,
        error: DispatchError,
        ctx: &'a mut C,
        next: Next<'a, C>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Called once the handler list is exhausted.
pub trait Terminal<C>: Send + Sync {
    /// Finish the dispatch; `error` is set when the pipeline ended in error mode.
    fn finish<'a>(&'a self, ctx: &'a mut C, error: Option<DispatchError>) -> BoxFuture<'a, ()>;
}

/// A pipeline entry, tagged at registration time.
pub enum Middleware<C> {
    /// Invoked in both modes
    Handler(Arc<dyn Handler<C>>),
    /// Invoked in error mode only
    ErrorHandler(Arc<dyn ErrorHandler<C>>),
}

impl<C> Clone for Middleware<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Handler(handler) => Self::Handler(Arc::clone(handler)),
            Self::ErrorHandler(handler) => Self::ErrorHandler(Arc::clone(handler)),
        }
    }
}

impl<C> fmt::Debug for Middleware<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Middleware::Handler"),
            Self::ErrorHandler(_) => f.write_str("Middleware::ErrorHandler"),
        }
    }
}

impl<C: PipelineContext> Middleware<C> {
    /// Wrap a normal handler.
    pub fn handler<H>(handler: H) -> Self
    where
        H: Handler<C> + 'static,
    {
        Self::Handler(Arc::new(handler))
    }

    /// Wrap an error handler.
    pub fn error_handler<H>(handler: H) -> Self
    where
        H: ErrorHandler<C> + 'static,
    {
        Self::ErrorHandler(Arc::new(handler))
    }

    /// A normal handler from a closure returning a boxed future.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        Self::handler(FnHandler(f))
    }

    /// An error handler from a closure returning a boxed future.
    pub fn from_error_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(DispatchError, &'a mut C, Next<'a, C>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        Self::error_handler(FnErrorHandler(f))
    }

    /// Whether this entry only runs in error mode.
    #[must_use]
    pub const fn is_error_handler(&self) -> bool {
        matches!(self, Self::ErrorHandler(_))
    }
}

/// Closure adapter for [`Handler`].
pub struct FnHandler<F>(pub F);

impl<C, F> Handler<C> for FnHandler<F>
where
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx, next)
    }
}

/// Closure adapter for [`ErrorHandler`].
pub struct FnErrorHandler<F>(pub F);

impl<C, F> ErrorHandler<C> for FnErrorHandler<F>
where
    F: for<'a> Fn(DispatchError, &'a mut C, Next<'a, C>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        error: DispatchError,
        ctx: &'a mut C,
        next: Next<'a, C>,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.0)(error, ctx, next)
    }
}

/// How named entries are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryOrder {
    /// Registration order
    #[default]
    Insertion,
    /// Sorted by name; unnamed entries follow the named ones
    ByName,
}

struct Entry<C> {
    name: Option<String>,
    middleware: Middleware<C>,
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            middleware: self.middleware.clone(),
        }
    }
}

/// An ordered list of middleware.
pub struct Pipeline<C> {
    entries: Vec<Entry<C>>,
    order: EntryOrder,
}

impl<C> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            order: self.order,
        }
    }
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            order: EntryOrder::Insertion,
        }
    }
}

impl<C> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("order", &self.order)
            .field(
                "entries",
                &self
                    .entries
                    .iter()
                    .map(|entry| entry.name.as_deref().unwrap_or("<unnamed>"))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<C: PipelineContext> Pipeline<C> {
    /// Empty pipeline in registration order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty pipeline whose named entries run in name order.
    #[must_use]
    pub fn sorted_by_name() -> Self {
        Self {
            entries: Vec::new(),
            order: EntryOrder::ByName,
        }
    }

    /// Append an unnamed entry.
    pub fn push(&mut self, middleware: Middleware<C>) -> &mut Self {
        self.entries.push(Entry {
            name: None,
            middleware,
        });
        self
    }

    /// Insert an unnamed entry in front of the entry named `anchor`, or append it when
    /// there is no such entry.
    pub fn push_before(&mut self, anchor: &str, middleware: Middleware<C>) -> &mut Self {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.name.as_deref() == Some(anchor))
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            Entry {
                name: None,
                middleware,
            },
        );
        self
    }

    /// Append an unnamed closure handler.
    pub fn use_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.push(Middleware::from_fn(f))
    }

    /// Register a named entry. An existing entry with the same name is replaced in
    /// place.
    pub fn insert(&mut self, name: impl Into<String>, middleware: Middleware<C>) -> &mut Self {
        let name = name.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.name.as_deref() == Some(name.as_str()))
        {
            entry.middleware = middleware;
            return self;
        }

        let position = match self.order {
            EntryOrder::Insertion => self.entries.len(),
            EntryOrder::ByName => self
                .entries
                .iter()
                .position(|entry| entry.name.as_deref().is_none_or(|other| other > name.as_str()))
                .unwrap_or(self.entries.len()),
        };
        self.entries.insert(
            position,
            Entry {
                name: Some(name),
                middleware,
            },
        );
        self
    }

    /// Remove a named entry.
    pub fn remove(&mut self, name: &str) -> Option<Middleware<C>> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.name.as_deref() == Some(name))?;
        Some(self.entries.remove(position).middleware)
    }

    /// Whether a named entry is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name.as_deref() == Some(name))
    }

    /// Names of the named entries, in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| entry.name.as_deref())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pipeline has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the pipeline from the first entry in normal mode.
    pub async fn execute(&self, ctx: &mut C, terminal: &dyn Terminal<C>) {
        self.execute_with(ctx, None, terminal).await;
    }

    /// Run the pipeline from the first entry, in error mode when `error` is set.
    pub async fn execute_with(
        &self,
        ctx: &mut C,
        error: Option<DispatchError>,
        terminal: &dyn Terminal<C>,
    ) {
        let cursor = Cursor::new(&self.entries, terminal);
        cursor.advance(ctx, error).await;
    }

    /// Run the pipeline as a single step of an enclosing chain.
    ///
    /// The nested list starts in normal mode. Once it is exhausted the enclosing chain
    /// continues; an error the enclosing chain was already carrying takes precedence
    /// over one raised inside.
    pub async fn nest(&self, ctx: &mut C, next: Next<'_, C>) {
        let resume = Resume {
            outer: next.cursor,
            carried: next.carried,
        };
        let cursor = Cursor::new(&self.entries, &resume);
        cursor.advance(ctx, None).await;
    }
}

/// Per-invocation executor state.
struct Cursor<'a, C> {
    entries: &'a [Entry<C>],
    position: AtomicUsize,
    terminal: &'a (dyn Terminal<C> + 'a),
}

impl<'a, C: PipelineContext> Cursor<'a, C> {
    fn new(entries: &'a [Entry<C>], terminal: &'a (dyn Terminal<C> + 'a)) -> Self {
        Self {
            entries,
            position: AtomicUsize::new(0),
            terminal,
        }
    }

    fn advance<'b>(&'b self, ctx: &'b mut C, error: Option<DispatchError>) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let index = self.position.fetch_add(1, Ordering::AcqRel);
            let Some(entry) = self.entries.get(index) else {
                self.terminal.finish(ctx, error).await;
                return;
            };

            let outcome = match (&entry.middleware, error) {
                (Middleware::Handler(handler), carried) => {
                    handler.call(&mut *ctx, Next::new(self, carried)).await
                },
                (Middleware::ErrorHandler(handler), Some(error)) => {
                    handler
                        .call(error.clone(), &mut *ctx, Next::new(self, Some(error)))
                        .await
                },
                (Middleware::ErrorHandler(_), None) => {
                    self.advance(ctx, None).await;
                    return;
                },
            };

            if let Err(failure) = outcome {
                tracing::warn!(
                    error = %failure,
                    position = index,
                    handler = entry.name.as_deref().unwrap_or("<unnamed>"),
                    "Handler failed, continuing in error mode"
                );
                DispatchMetrics::record_handler_error();
                ctx.handler_failed(&failure);
                self.advance(ctx, Some(failure)).await;
            }
        })
    }
}

/// Terminal of a nested pipeline: continue the enclosing chain.
struct Resume<'a, C> {
    outer: &'a Cursor<'a, C>,
    carried: Option<DispatchError>,
}

impl<C: PipelineContext> Terminal<C> for Resume<'_, C> {
    fn finish<'b>(&'b self, ctx: &'b mut C, error: Option<DispatchError>) -> BoxFuture<'b, ()> {
        self.outer.advance(ctx, self.carried.clone().or(error))
    }
}

/// Continuation handed to each handler.
pub struct Next<'a, C> {
    cursor: &'a Cursor<'a, C>,
    carried: Option<DispatchError>,
}

impl<'a, C: PipelineContext> Next<'a, C> {
    const fn new(cursor: &'a Cursor<'a, C>, carried: Option<DispatchError>) -> Self {
        Self { cursor, carried }
    }

    /// The error carried in error mode.
    #[must_use]
    pub const fn error(&self) -> Option<&DispatchError> {
        self.carried.as_ref()
    }

    /// Continue in the current mode.
    pub fn run<'b>(self, ctx: &'b mut C) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        self.cursor.advance(ctx, self.carried)
    }

    /// Continue in error mode with `error`.
    pub fn fail<'b>(self, ctx: &'b mut C, error: DispatchError) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        self.cursor.advance(ctx, Some(error))
    }

    /// Continue in normal mode, consuming any carried error.
    pub fn resume<'b>(self, ctx: &'b mut C) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        self.cursor.advance(ctx, None)
    }
}

impl<C> fmt::Debug for Next<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("carried", &self.carried)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trail {
        steps: Vec<String>,
        status: Option<u16>,
    }

    impl PipelineContext for Trail {
        fn handler_failed(&mut self, _error: &DispatchError) {
            self.status = Some(500);
        }
    }

    struct Out;

    impl Terminal<Trail> for Out {
        fn finish<'a>(
            &'a self,
            ctx: &'a mut Trail,
            error: Option<DispatchError>,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let step = match error {
                    Some(error) => format!("out({})", error.message()),
                    None => "out".to_string(),
                };
                ctx.steps.push(step);
            })
        }
    }

    fn step(name: &'static str) -> Middleware<Trail> {
        Middleware::from_fn(move |ctx: &mut Trail, next| {
            Box::pin(async move {
                ctx.steps.push(name.to_string());
                next.run(ctx).await;
                Ok(())
            })
        })
    }

    fn failing(name: &'static str) -> Middleware<Trail> {
        Middleware::from_fn(move |ctx: &mut Trail, _next| {
            Box::pin(async move {
                ctx.steps.push(name.to_string());
                Err(DispatchError::new(format!("{name} failed")))
            })
        })
    }

    fn catcher(name: &'static str) -> Middleware<Trail> {
        Middleware::from_error_fn(move |error, ctx: &mut Trail, next| {
            Box::pin(async move {
                ctx.steps.push(format!("{name}[{}]", error.message()));
                next.run(ctx).await;
                Ok(())
            })
        })
    }

    async fn run(pipeline: &Pipeline<Trail>) -> Trail {
        let mut trail = Trail::default();
        pipeline.execute(&mut trail, &Out).await;
        trail
    }

    #[tokio::test]
    async fn runs_in_order_then_terminal() {
        let mut pipeline = Pipeline::new();
        pipeline.push(step("a")).push(step("b")).push(step("c"));
        assert_eq!(run(&pipeline).await.steps, vec!["a", "b", "c", "out"]);
    }

    #[tokio::test]
    async fn failure_keeps_later_handlers_and_reaches_error_handler() {
        let mut pipeline = Pipeline::new();
        pipeline
            .push(step("a"))
            .push(failing("b"))
            .push(step("c"))
            .push(catcher("e"));

        let trail = run(&pipeline).await;
        assert_eq!(
            trail.steps,
            vec!["a", "b", "c", "e[b failed]", "out(b failed)"]
        );
        assert_eq!(trail.status, Some(500));
    }

    #[tokio::test]
    async fn error_handlers_are_skipped_in_normal_mode() {
        let mut pipeline = Pipeline::new();
        pipeline.push(catcher("e")).push(step("a"));
        assert_eq!(run(&pipeline).await.steps, vec!["a", "out"]);
    }

    #[tokio::test]
    async fn stopping_short_skips_terminal() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_fn(|ctx: &mut Trail, _next| {
                Box::pin(async move {
                    ctx.steps.push("stop".to_string());
                    Ok(())
                })
            })
            .push(step("never"));
        assert_eq!(run(&pipeline).await.steps, vec!["stop"]);
    }

    #[tokio::test]
    async fn resume_consumes_the_error() {
        let mut pipeline = Pipeline::new();
        pipeline
            .push(failing("a"))
            .push(Middleware::from_error_fn(|_error, ctx: &mut Trail, next| {
                Box::pin(async move {
                    ctx.steps.push("recovered".to_string());
                    next.resume(ctx).await;
                    Ok(())
                })
            }))
            .push(step("b"));
        assert_eq!(run(&pipeline).await.steps, vec!["a", "recovered", "b", "out"]);
    }

    #[tokio::test]
    async fn fail_enters_error_mode_without_500() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_fn(|ctx: &mut Trail, next| {
                Box::pin(async move {
                    next.fail(ctx, DispatchError::new("declined")).await;
                    Ok(())
                })
            })
            .push(catcher("e"));
        let trail = run(&pipeline).await;
        assert_eq!(trail.steps, vec!["e[declined]", "out(declined)"]);
        assert_eq!(trail.status, None);
    }

    #[tokio::test]
    async fn handlers_can_work_after_next_returns() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_fn(|ctx: &mut Trail, next| {
                Box::pin(async move {
                    next.run(ctx).await;
                    ctx.steps.push("after".to_string());
                    Ok(())
                })
            })
            .push(step("a"));
        assert_eq!(run(&pipeline).await.steps, vec!["a", "out", "after"]);
    }

    #[tokio::test]
    async fn nested_pipeline_continues_outer_chain() {
        let mut inner = Pipeline::new();
        inner.push(step("inner-1")).push(step("inner-2"));
        let inner = Arc::new(inner);

        let mut outer = Pipeline::new();
        outer.push(step("a"));
        let nested = Arc::clone(&inner);
        outer.push(Middleware::from_fn(move |ctx: &mut Trail, next| {
            let nested = Arc::clone(&nested);
            Box::pin(async move {
                nested.nest(ctx, next).await;
                Ok(())
            })
        }));
        outer.push(step("b"));

        assert_eq!(
            run(&outer).await.steps,
            vec!["a", "inner-1", "inner-2", "b", "out"]
        );
    }

    #[tokio::test]
    async fn named_entries_replace_and_sort() {
        let mut pipeline = Pipeline::sorted_by_name();
        pipeline
            .insert("reqres", step("reqres"))
            .insert("clientapp", step("clientapp"))
            .insert("reqres", step("reqres-2"));

        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["clientapp", "reqres"]);
        assert_eq!(run(&pipeline).await.steps, vec!["clientapp", "reqres-2", "out"]);

        assert!(pipeline.remove("clientapp").is_some());
        assert!(!pipeline.contains("clientapp"));
    }

    #[tokio::test]
    async fn push_before_anchors_unnamed_entries() {
        let mut pipeline = Pipeline::new();
        pipeline
            .insert("route", step("route"))
            .insert("render", step("render"))
            .push_before("render", step("api"))
            .push_before("missing", step("tail"));

        assert_eq!(
            run(&pipeline).await.steps,
            vec!["route", "api", "render", "tail", "out"]
        );
    }

    #[tokio::test]
    async fn concurrent_dispatches_keep_their_own_cursor() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_fn(|ctx: &mut Trail, next| {
                Box::pin(async move {
                    ctx.steps.push("a".to_string());
                    tokio::task::yield_now().await;
                    next.run(ctx).await;
                    Ok(())
                })
            })
            .push(step("b"));
        let pipeline = Arc::new(pipeline);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { run(&pipeline).await.steps })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), vec!["a", "b", "out"]);
        }
    }
}
