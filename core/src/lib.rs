//! # Isomorph Core
//!
//! Core types shared by the server and client hosts of an isomorphic application.
//!
//! The same request-processing logic runs when a server answers an HTTP request and
//! when a client simulates a request from in-browser navigation. This crate holds the
//! host-independent pieces of that logic:
//!
//! - **Request**: the canonical, platform-neutral view of one incoming request
//! - **Status table**: default status messages and the custom-message preservation rule
//! - **Action**: `{type, payload: {name, value}}` records fed to the state store
//! - **Reducer**: pure `(slice, action) -> slice` functions over JSON values
//! - **Configuration**: process globals (`DEV`, `WAPP`, ...) and derived names
//! - **Errors**: [`DispatchError`] for the pipeline, [`StateError`] for the store
//!
//! ## Example
//!
//! ```
//! use isomorph_core::action::Action;
//! use isomorph_core::composition::SliceReducer;
//! use isomorph_core::reducer::Reducer;
//! use serde_json::json;
//!
//! let reducer = SliceReducer::new("res");
//! let state = reducer
//!     .reduce(&json!({}), &Action::insert("res", "responses", json!({"a": 1})))
//!     .unwrap();
//! let state = reducer
//!     .reduce(&state, &Action::insert("res", "responses", json!({"b": 2})))
//!     .unwrap();
//!
//! assert_eq!(state, json!({"responses": {"a": 1, "b": 2}}));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::{Map, Value};

pub mod action;
pub mod composition;
pub mod config;
pub mod error;
pub mod request;
pub mod status;

pub use error::{DispatchError, StateError};

/// The full state tree held by a store: slice name to slice value.
pub type StateMap = Map<String, Value>;

/// Reducer module - pure state transitions
///
/// Reducers never mutate the state they are given. They return the next value,
/// which the store swaps in place of the previous one.
pub mod reducer {
    use crate::action::Action;
    use crate::error::StateError;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Example
    ///
    /// ```
    /// use isomorph_core::action::Action;
    /// use isomorph_core::reducer::Reducer;
    /// use isomorph_core::{StateError, Value};
    ///
    /// struct Counter;
    ///
    /// impl Reducer for Counter {
    ///     type State = Value;
    ///
    ///     fn reduce(&self, state: &Value, action: &Action) -> Result<Value, StateError> {
    ///         match action.kind.as_str() {
    ///             "INCREMENT" => Ok(Value::from(state.as_i64().unwrap_or(0) + 1)),
    ///             _ => Ok(state.clone()),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer: Send + Sync {
        /// The state type this reducer operates on
        type State;

        /// Produce the next state from the previous one.
        ///
        /// Actions the reducer does not handle must return the previous state unchanged.
        ///
        /// # Errors
        ///
        /// Returns [`StateError`] when the previous state has a shape the reducer cannot
        /// work with. Callers isolate the failure to this reducer.
        fn reduce(&self, state: &Self::State, action: &Action) -> Result<Self::State, StateError>;
    }
}

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock abstraction for request timestamps
    ///
    /// Production uses [`SystemClock`]; tests use a fixed clock so that rendered
    /// output and hydration snapshots are deterministic.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
