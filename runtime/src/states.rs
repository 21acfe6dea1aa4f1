//! State management and hydration.
//!
//! The states middleware attaches a store to every dispatch and mirrors the canonical
//! request and response into its `req` and `res` slices. It runs its own handle list,
//! ordered by name:
//!
//! - `clientapp` adopts what only the server knows (method, transport version, peer
//!   address) from the hydration snapshot, and on the first client dispatch also the
//!   server's timestamp and status line.
//! - `reqres` creates or reuses the store and dispatches `SET_REQ`/`SET_RES` for the
//!   fields that changed.
//!
//! On the server every dispatch gets a fresh store. On the client the first dispatch
//! seeds the store from the snapshot and every later navigation reuses it. A field is
//! only dispatched when it differs from the store's current value, and on the first
//! dispatch also from the seed, so a client booted from a server document starts
//! without dispatching anything.

use std::sync::Arc;

use futures::future::BoxFuture;
use isomorph_core::action::Action;
use isomorph_core::composition::{SharedSliceReducer, SliceReducers};
use isomorph_core::reducer::Reducer;
use isomorph_core::status::StatusLine;
use isomorph_core::{StateError, StateMap, Value};
use parking_lot::RwLock;

use crate::context::Context;
use crate::host::HostScope;
use crate::pipeline::{Handler, HandlerResult, Middleware, Next, Pipeline};
use crate::store::Store;

/// Slice holding the canonical request.
pub const REQ: &str = "req";
/// Slice holding the canonical response.
pub const RES: &str = "res";

/// Owns the slice reducers and creates stores over them.
#[derive(Debug)]
pub struct StateManager {
    reducers: RwLock<SliceReducers>,
}

impl StateManager {
    /// Manager with the `req` and `res` slices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reducers: RwLock::new(SliceReducers::request_response()),
        }
    }

    /// Register (or replace) the reducer for `slice`. Stores created afterwards use it.
    pub fn add_reducer<R>(&self, slice: impl Into<String>, reducer: R)
    where
        R: Reducer<State = Value> + 'static,
    {
        self.reducers.write().insert(slice, reducer);
    }

    /// Register (or replace) a shared reducer for `slice`.
    pub fn add_shared_reducer(&self, slice: impl Into<String>, reducer: SharedSliceReducer) {
        self.reducers.write().insert_shared(slice, reducer);
    }

    /// The current reducer composition.
    #[must_use]
    pub fn reducers(&self) -> SliceReducers {
        self.reducers.read().clone()
    }

    /// A store starting from `initial`.
    #[must_use]
    pub fn create_store(&self, initial: StateMap) -> Store {
        Store::new(self.reducers(), initial)
    }

    /// A store seeded from a hydration snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidSnapshot`] if `snapshot` is not an object.
    pub fn store_from_snapshot(&self, snapshot: &Value) -> Result<Store, StateError> {
        Store::from_snapshot(self.reducers(), snapshot)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether this dispatch creates the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInit(pub bool);

fn store_init(ctx: &Context) -> bool {
    ctx.extensions().get::<StoreInit>().is_none_or(|init| init.0)
}

/// The `req`/`res` state mirrored from the live request and response.
///
/// # Errors
///
/// Returns [`StateError::Serialize`] if the request cannot be serialized.
pub fn live_state(ctx: &Context) -> Result<StateMap, StateError> {
    let mut state = StateMap::new();
    state.insert(REQ.to_string(), Value::Object(ctx.request_fields()?));
    state.insert(RES.to_string(), Value::Object(ctx.response().state_fields()));
    Ok(state)
}

fn field<'s>(state: &'s StateMap, slice: &str, name: &str) -> &'s Value {
    state
        .get(slice)
        .and_then(|fields| fields.get(name))
        .unwrap_or(&Value::Null)
}

fn snapshot_text(fields: Option<&Value>, name: &str) -> Option<String> {
    fields?
        .get(name)?
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Record a data fetch result: `INS_RES` into the `responses` bucket.
///
/// Returns `false` when the dispatch has no store.
pub fn record_response(ctx: &Context, value: Value) -> bool {
    match ctx.response().store() {
        Some(store) => {
            store.dispatch(&Action::insert(RES, "responses", value));
            true
        },
        None => false,
    }
}

/// `clientapp`: adopt server-only request fields from the hydration snapshot.
#[derive(Debug, Clone)]
pub struct AdoptSnapshot {
    host: Arc<HostScope>,
}

impl AdoptSnapshot {
    /// Handle reading from `host`.
    #[must_use]
    pub const fn new(host: Arc<HostScope>) -> Self {
        Self { host }
    }

    fn adopt(&self, ctx: &mut Context) {
        if !self.host.is_client() {
            return;
        }
        let Some(snapshot) = self.host.snapshot() else {
            return;
        };
        let req = snapshot.get(REQ);
        let res = snapshot.get(RES);
        let init = store_init(ctx);

        let request = ctx.request_mut();
        request.http_version =
            snapshot_text(req, "httpVersion").unwrap_or_else(|| "1.1".to_string());
        if let Some(method) = snapshot_text(req, "method") {
            request.method = method;
        }
        if let Some(remote_address) = snapshot_text(req, "remoteAddress") {
            request.remote_address = remote_address;
        }

        if !init {
            return;
        }
        if let Some(timestamp) = req
            .and_then(|fields| fields.get("timestamp"))
            .and_then(Value::as_i64)
        {
            request.timestamp = timestamp;
        }

        let response = ctx.response();
        let code = res
            .and_then(|fields| fields.get("statusCode"))
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .or_else(|| response.status_code());
        let message = snapshot_text(res, "statusMessage")
            .or_else(|| response.status_message().map(str::to_string));
        let error_message = snapshot_text(res, "errorMessage")
            .or_else(|| response.error_message().map(str::to_string));

        ctx.response_mut()
            .restore_status(StatusLine { code, message }, error_message);
    }
}

impl Handler<Context> for AdoptSnapshot {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.adopt(ctx);
            next.run(ctx).await;
            Ok(())
        })
    }
}

/// `reqres`: attach the store and dispatch changed request/response fields.
#[derive(Debug, Clone)]
pub struct SyncRequestState {
    manager: Arc<StateManager>,
    host: Arc<HostScope>,
}

impl SyncRequestState {
    /// Handle creating stores through `manager`.
    #[must_use]
    pub const fn new(manager: Arc<StateManager>, host: Arc<HostScope>) -> Self {
        Self { manager, host }
    }

    fn attach_store(&self, ctx: &mut Context, seed: &StateMap, init: bool) -> Store {
        if !init {
            let existing = ctx
                .response()
                .store()
                .or_else(|| self.host.last_client_store())
                .cloned();
            if let Some(store) = existing {
                ctx.response_mut().set_store(store.clone());
                return store;
            }
        }

        let store = self.manager.create_store(seed.clone());
        if self.host.is_client() && !self.host.remember_client_store(store.clone()) {
            tracing::debug!("Client store already remembered");
        }
        ctx.response_mut().set_store(store.clone());
        store
    }

    #[tracing::instrument(skip_all, fields(init))]
    fn sync(&self, ctx: &mut Context) -> Result<(), StateError> {
        let init = store_init(ctx);
        tracing::Span::current().record("init", init);
        let live = live_state(ctx)?;
        let seed = match (self.host.is_client(), self.host.snapshot()) {
            (true, Some(Value::Object(snapshot))) => snapshot.clone(),
            _ => live.clone(),
        };

        let store = self.attach_store(ctx, &seed, init);

        let mut dispatched = 0_usize;
        for slice in [REQ, RES] {
            let Some(Value::Object(fields)) = live.get(slice) else {
                continue;
            };
            for (name, value) in fields {
                if init && field(&seed, slice, name) == value {
                    continue;
                }
                let current = store
                    .get_state_at(&format!("{slice}.{name}"))
                    .unwrap_or(Value::Null);
                if current == *value {
                    continue;
                }
                store.dispatch(&Action::set(slice, name.clone(), value.clone()));
                dispatched += 1;
            }
        }
        tracing::debug!(dispatched, "Request state synchronised");
        Ok(())
    }
}

impl Handler<Context> for SyncRequestState {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.sync(ctx)?;
            next.run(ctx).await;
            Ok(())
        })
    }
}

/// Runs the state handles as one step of the application pipeline.
pub struct StatesMiddleware {
    manager: Arc<StateManager>,
    host: Arc<HostScope>,
    handles: RwLock<Arc<Pipeline<Context>>>,
}

impl StatesMiddleware {
    /// Middleware with the `clientapp` and `reqres` handles.
    #[must_use]
    pub fn new(manager: Arc<StateManager>, host: Arc<HostScope>) -> Self {
        let mut handles = Pipeline::sorted_by_name();
        handles.insert(
            "clientapp",
            Middleware::handler(AdoptSnapshot::new(Arc::clone(&host))),
        );
        handles.insert(
            "reqres",
            Middleware::handler(SyncRequestState::new(Arc::clone(&manager), Arc::clone(&host))),
        );
        Self {
            manager,
            host,
            handles: RwLock::new(Arc::new(handles)),
        }
    }

    /// The state manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<StateManager> {
        &self.manager
    }

    /// Register (or replace) a named handle. Handles run in name order.
    pub fn add_handle(&self, name: impl Into<String>, middleware: Middleware<Context>) {
        Arc::make_mut(&mut self.handles.write()).insert(name, middleware);
    }

    /// Names of the registered handles, in run order.
    #[must_use]
    pub fn handle_names(&self) -> Vec<String> {
        self.handles.read().names().map(str::to_string).collect()
    }
}

impl std::fmt::Debug for StatesMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatesMiddleware")
            .field("handles", &self.handle_names())
            .field("target", &self.host.target())
            .finish()
    }
}

impl Handler<Context> for StatesMiddleware {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let init = !self.host.is_client() || self.host.last_client_store().is_none();
            ctx.extensions_mut().insert(StoreInit(init));

            let handles = Arc::clone(&self.handles.read());
            handles.nest(ctx, next).await;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::{ContextBuilder, RawRequest, RawResponse};
    use crate::pipeline::Terminal;
    use isomorph_core::DispatchError;
    use isomorph_core::composition::SliceReducer;
    use isomorph_core::config::{CommonConfig, Target};
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

    struct Done;

    impl Terminal<Context> for Done {
        fn finish<'a>(
            &'a self,
            _ctx: &'a mut Context,
            _error: Option<DispatchError>,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    fn context(raw: RawRequest) -> Context {
        ContextBuilder::new(CommonConfig::default()).normalize(raw, Box::new(Discard))
    }

    fn raw(url: &str, timestamp: i64) -> RawRequest {
        RawRequest {
            timestamp: Some(timestamp),
            ..RawRequest::get(url)
        }
    }

    fn states(target: Target) -> Arc<StatesMiddleware> {
        Arc::new(StatesMiddleware::new(
            Arc::new(StateManager::new()),
            Arc::new(HostScope::new(target)),
        ))
    }

    async fn run(states: &Arc<StatesMiddleware>, ctx: &mut Context) {
        let handler: Arc<dyn Handler<Context>> = Arc::clone(states) as Arc<dyn Handler<Context>>;
        let mut pipeline: Pipeline<Context> = Pipeline::new();
        pipeline.push(Middleware::Handler(handler));
        pipeline.execute(ctx, &Done).await;
    }

    #[tokio::test]
    async fn server_store_mirrors_request_without_dispatching() {
        let states = states(Target::Server);
        let mut ctx = context(raw("/about?tab=2", 1_000));
        ctx.status(200, None);
        run(&states, &mut ctx).await;

        let store = ctx.response().store().unwrap();
        assert_eq!(store.dispatch_count(), 0);
        assert_eq!(store.get_state_at("req.path"), Some(json!("/about")));
        assert_eq!(store.get_state_at("req.query.tab"), Some(json!("2")));
        assert_eq!(store.get_state_at("res.statusCode"), Some(json!(200)));
        assert_eq!(store.get_state_at("res.containerElementId"), Some(json!("app")));
    }

    #[tokio::test]
    async fn server_creates_a_store_per_dispatch() {
        let states = states(Target::Server);
        let mut first = context(raw("/", 1));
        let mut second = context(raw("/", 2));
        run(&states, &mut first).await;
        run(&states, &mut second).await;
        assert!(!Store::ptr_eq(
            first.response().store().unwrap(),
            second.response().store().unwrap()
        ));
    }

    #[tokio::test]
    async fn client_hydrates_from_snapshot_then_reuses_store() {
        let host = Arc::new(HostScope::new(Target::Client));
        let server_state = {
            let mut ctx = context(RawRequest {
                method: "POST".to_string(),
                socket_address: Some("198.51.100.2".to_string()),
                ..raw("/cart", 5_000)
            });
            ctx.status(404, None);
            live_state(&ctx).unwrap()
        };
        host.install_snapshot(Value::Object(server_state));
        let states = Arc::new(StatesMiddleware::new(Arc::new(StateManager::new()), Arc::clone(&host)));

        let mut first = context(raw("/cart", 9_999));
        first.status(404, None);
        run(&states, &mut first).await;

        assert_eq!(first.request().method, "POST");
        assert_eq!(first.request().timestamp, 5_000);
        assert_eq!(first.request().remote_address, "198.51.100.2");
        let store = first.response().store().unwrap().clone();
        assert_eq!(store.dispatch_count(), 0);
        assert!(Store::ptr_eq(host.last_client_store().unwrap(), &store));

        let mut second = context(raw("/checkout", 12_000));
        second.status(200, None);
        run(&states, &mut second).await;

        assert!(Store::ptr_eq(second.response().store().unwrap(), &store));
        assert_eq!(second.request().timestamp, 12_000);
        assert_eq!(store.get_state_at("req.path"), Some(json!("/checkout")));
        assert_eq!(store.get_state_at("res.statusCode"), Some(json!(200)));
        assert_eq!(store.get_state_at("res.statusMessage"), Some(json!("OK")));
        assert!(store.dispatch_count() > 0);
    }

    #[tokio::test]
    async fn extra_handles_run_in_name_order() {
        let states = states(Target::Server);
        states.add_handle(
            "zz-after",
            Middleware::from_fn(|ctx: &mut Context, next| {
                Box::pin(async move {
                    let seen = ctx.response().store().is_some();
                    ctx.extensions_mut().insert(seen);
                    next.run(ctx).await;
                    Ok(())
                })
            }),
        );
        assert_eq!(states.handle_names(), vec!["clientapp", "reqres", "zz-after"]);

        let mut ctx = context(raw("/", 1));
        run(&states, &mut ctx).await;
        assert_eq!(ctx.extensions().get::<bool>(), Some(&true));
    }

    #[tokio::test]
    async fn recorded_responses_merge() {
        let manager = StateManager::new();
        manager.add_reducer("user", SliceReducer::new("user"));
        let mut ctx = context(raw("/", 1));
        assert!(!record_response(&ctx, json!({"a": 1})));

        ctx.response_mut().set_store(manager.create_store(StateMap::new()));
        assert!(record_response(&ctx, json!({"a": 1})));
        assert!(record_response(&ctx, json!({"b": 2})));
        let store = ctx.response().store().unwrap();
        assert_eq!(store.get_state_at("res.responses"), Some(json!({"a": 1, "b": 2})));
        assert_eq!(manager.reducers().len(), 3);
    }
}
