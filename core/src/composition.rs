//! Reducer composition utilities
//!
//! A store's state is a map of named slices. Each slice is owned by one reducer:
//! - **[`SliceReducer`]**: the canonical `SET_<SLICE>` / `INS_<SLICE>` reducer
//! - **[`SliceReducers`]**: slice-keyed composition that threads one action through
//!   every registered slice reducer, isolating failures per slice
//! - **[`reducer_fn`]**: adapt a closure into a slice reducer
//!
//! # Examples
//!
//! ```
//! use isomorph_core::action::Action;
//! use isomorph_core::composition::{SliceReducer, SliceReducers};
//! use isomorph_core::StateMap;
//! use serde_json::json;
//!
//! let mut reducers = SliceReducers::new();
//! reducers.insert("req", SliceReducer::new("req"));
//! reducers.insert("res", SliceReducer::new("res"));
//!
//! let applied = reducers.apply(&StateMap::new(), &Action::set("req", "path", json!("/")));
//! assert!(applied.failures.is_empty());
//! assert_eq!(applied.state["req"], json!({"path": "/"}));
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::StateMap;
use crate::action::{Action, Operation};
use crate::error::StateError;
use crate::reducer::Reducer;

/// A reducer over one slice of the state tree.
pub type SharedSliceReducer = Arc<dyn Reducer<State = Value>>;

/// The canonical reducer for a named slice.
///
/// Handles `SET_<SLICE>` and `INS_<SLICE>`. The slice is an object keyed by field
/// name; a missing slice starts out empty.
#[derive(Debug, Clone)]
pub struct SliceReducer {
    slice: String,
    set_type: String,
    insert_type: String,
}

impl SliceReducer {
    /// Create the reducer for `slice`.
    #[must_use]
    pub fn new(slice: impl Into<String>) -> Self {
        let slice = slice.into();
        Self {
            set_type: Operation::Set.action_type(&slice),
            insert_type: Operation::Insert.action_type(&slice),
            slice,
        }
    }

    /// The slice this reducer owns.
    #[must_use]
    pub fn slice(&self) -> &str {
        &self.slice
    }

    fn operation(&self, action: &Action) -> Option<Operation> {
        if action.kind == self.set_type {
            Some(Operation::Set)
        } else if action.kind == self.insert_type {
            Some(Operation::Insert)
        } else {
            None
        }
    }
}

impl Reducer for SliceReducer {
    type State = Value;

    fn reduce(&self, state: &Value, action: &Action) -> Result<Value, StateError> {
        let Some(operation) = self.operation(action) else {
            return Ok(state.clone());
        };
        let name = &action.payload.name;
        if name.is_empty() {
            return Ok(state.clone());
        }

        let mut fields = match state {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(StateError::NotAnObject {
                    slice: self.slice.clone(),
                    found: json_kind(other),
                });
            },
        };

        let incoming = &action.payload.value;
        match (operation, fields.get_mut(name), incoming) {
            (Operation::Insert, Some(Value::Object(existing)), Value::Object(added)) => {
                for (key, value) in added {
                    existing.insert(key.clone(), value.clone());
                }
            },
            _ => {
                fields.insert(name.clone(), incoming.clone());
            },
        }

        Ok(Value::Object(fields))
    }
}

struct FnReducer<F>(F);

impl<F> Reducer for FnReducer<F>
where
    F: Fn(&Value, &Action) -> Result<Value, StateError> + Send + Sync,
{
    type State = Value;

    fn reduce(&self, state: &Value, action: &Action) -> Result<Value, StateError> {
        (self.0)(state, action)
    }
}

/// Adapt a closure into a slice reducer.
pub fn reducer_fn<F>(f: F) -> SharedSliceReducer
where
    F: Fn(&Value, &Action) -> Result<Value, StateError> + Send + Sync + 'static,
{
    Arc::new(FnReducer(f))
}

/// Result of threading one action through every slice reducer.
#[derive(Debug, Clone)]
pub struct Applied {
    /// The next state tree
    pub state: StateMap,
    /// Failures, one per slice whose reducer failed; those slices kept their value
    pub failures: Vec<StateError>,
}

/// Slice-keyed reducer composition.
///
/// Slices are visited in registration order. Registering a slice name again replaces
/// its reducer in place.
#[derive(Clone, Default)]
pub struct SliceReducers {
    slices: Vec<(String, SharedSliceReducer)>,
}

impl SliceReducers {
    /// Empty composition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default composition: `req` and `res` canonical slices.
    #[must_use]
    pub fn request_response() -> Self {
        let mut reducers = Self::new();
        reducers.insert("req", SliceReducer::new("req"));
        reducers.insert("res", SliceReducer::new("res"));
        reducers
    }

    /// Register (or replace) the reducer for `slice`.
    pub fn insert<R>(&mut self, slice: impl Into<String>, reducer: R)
    where
        R: Reducer<State = Value> + 'static,
    {
        self.insert_shared(slice, Arc::new(reducer));
    }

    /// Register (or replace) an already shared reducer for `slice`.
    pub fn insert_shared(&mut self, slice: impl Into<String>, reducer: SharedSliceReducer) {
        let slice = slice.into();
        if let Some(entry) = self.slices.iter_mut().find(|(name, _)| *name == slice) {
            entry.1 = reducer;
        } else {
            self.slices.push((slice, reducer));
        }
    }

    /// Registered slice names in visiting order.
    pub fn slice_names(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|(name, _)| name.as_str())
    }

    /// Number of registered slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// Whether no slice is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Thread `action` through every slice reducer.
    ///
    /// Each reducer receives the previous value of its slice (`null` when absent).
    /// A failing reducer leaves its slice untouched and does not stop the others.
    /// Slices with no registered reducer are carried over unchanged.
    #[must_use]
    pub fn apply(&self, state: &StateMap, action: &Action) -> Applied {
        let mut next = state.clone();
        let mut failures = Vec::new();

        for (slice, reducer) in &self.slices {
            let previous = state.get(slice).unwrap_or(&Value::Null);
            match reducer.reduce(previous, action) {
                Ok(value) => {
                    next.insert(slice.clone(), value);
                },
                Err(error) => failures.push(error.in_slice(slice)),
            }
        }

        Applied {
            state: next,
            failures,
        }
    }
}

impl std::fmt::Debug for SliceReducers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceReducers")
            .field("slices", &self.slice_names().collect::<Vec<_>>())
            .finish()
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
