//! The state store.
//!
//! A [`Store`] holds a JSON state tree split into named slices. Dispatching an
//! action threads the previous tree through every slice reducer, swaps in the result,
//! then notifies subscribers with the action. Reducer and listener failures are logged
//! and isolated.
//!
//! Stores are cheap handles: clones share the same state and subscribers, which is
//! what lets the client reuse one store across navigations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use isomorph_core::action::Action;
use isomorph_core::composition::SliceReducers;
use isomorph_core::{StateError, StateMap, Value};
use parking_lot::RwLock;

use crate::metrics::DispatchMetrics;

/// A store subscriber. Receives the dispatched action, not the new state.
pub type Listener = Arc<dyn Fn(&Action) -> Result<(), StateError> + Send + Sync>;

struct Shared {
    state: RwLock<StateMap>,
    reducers: SliceReducers,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    dispatched: AtomicU64,
}

/// Reducer-driven JSON state.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Create a store over `reducers` starting from `initial`.
    #[must_use]
    pub fn new(reducers: SliceReducers, initial: StateMap) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(initial),
                reducers,
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    /// Seed a store from a hydration snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidSnapshot`] if `snapshot` is not an object.
    pub fn from_snapshot(reducers: SliceReducers, snapshot: &Value) -> Result<Self, StateError> {
        match snapshot {
            Value::Object(state) => Ok(Self::new(reducers, state.clone())),
            _ => Err(StateError::InvalidSnapshot),
        }
    }

    /// A deep copy of the whole state tree.
    #[must_use]
    pub fn get_state(&self) -> Value {
        Value::Object(self.shared.state.read().clone())
    }

    /// Read the state through a closure, without copying it.
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&StateMap) -> T,
    {
        f(&self.shared.state.read())
    }

    /// Look up a dotted path such as `res.statusCode`.
    ///
    /// Array elements are addressed by index (`res.items.0`). Returns `None` when any
    /// segment is missing.
    #[must_use]
    pub fn get_state_at(&self, path: &str) -> Option<Value> {
        self.state(|state| {
            let mut segments = path.split('.');
            let mut current = state.get(segments.next()?)?;
            for segment in segments {
                current = match current {
                    Value::Object(fields) => fields.get(segment)?,
                    Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
            Some(current.clone())
        })
    }

    /// Apply `action` to every slice, then notify subscribers.
    #[tracing::instrument(skip(self, action), fields(action = %action.kind, name = %action.payload.name), name = "store_dispatch")]
    pub fn dispatch(&self, action: &Action) {
        let failures = {
            let mut state = self.shared.state.write();
            let applied = self.shared.reducers.apply(&state, action);
            *state = applied.state;
            applied.failures
        };
        self.shared.dispatched.fetch_add(1, Ordering::AcqRel);

        for failure in &failures {
            tracing::error!(error = %failure, "Reducer failed, slice left unchanged");
        }

        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut listener_failures = 0;
        for listener in listeners {
            if let Err(failure) = listener(action) {
                listener_failures += 1;
                tracing::error!(error = %failure, "Store listener failed");
            }
        }

        DispatchMetrics::record_store_dispatch(failures.len() + listener_failures);
    }

    /// Register a listener. It stays registered until [`Subscription::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Action) -> Result<(), StateError> + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::AcqRel);
        self.shared.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Number of actions dispatched into this store.
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Acquire)
    }

    /// Serialize the state tree to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Serialize`] if serialization fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(&*self.shared.state.read())?)
    }

    /// Whether two handles point at the same store.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("reducers", &self.shared.reducers)
            .field("dispatched", &self.dispatch_count())
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns `false` if the store is gone or the listener was
    /// already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut listeners = shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}
