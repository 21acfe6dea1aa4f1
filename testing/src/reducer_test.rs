//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use isomorph_core::StateError;
use isomorph_core::action::Action;
use isomorph_core::reducer::Reducer;

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for error assertion functions
type ErrorAssertion = Box<dyn FnOnce(&StateError)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// Actions are applied in order; the first failure stops the run and is handed to
/// the error assertions.
///
/// # Example
///
/// ```
/// use isomorph_core::action::Action;
/// use isomorph_core::composition::SliceReducer;
/// use isomorph_testing::ReducerTest;
/// use serde_json::json;
///
/// ReducerTest::new(SliceReducer::new("res"))
///     .given_state(json!({}))
///     .when_action(Action::insert("res", "responses", json!({"a": 1})))
///     .when_action(Action::insert("res", "responses", json!({"b": 2})))
///     .then_state(|state| {
///         assert_eq!(state["responses"], json!({"a": 1, "b": 2}));
///     })
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    initial_state: Option<R::State>,
    actions: Vec<Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    error_assertions: Vec<ErrorAssertion>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to apply (When)
    #[must_use]
    pub fn when_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the run to fail, and assert on the error (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&StateError) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if the initial state or actions are not set, if the outcome (success or
    /// failure) is not the expected one, or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        for action in &self.actions {
            match self.reducer.reduce(&state, action) {
                Ok(next) => state = next,
                Err(error) => {
                    assert!(
                        !self.error_assertions.is_empty(),
                        "Reducer failed on {}: {error}",
                        action.kind
                    );
                    for assertion in self.error_assertions {
                        assertion(&error);
                    }
                    return;
                },
            }
        }

        assert!(
            self.error_assertions.is_empty(),
            "Expected the reducer to fail, but every action succeeded"
        );
        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for reducer results
pub mod assertions {
    use isomorph_core::Value;

    /// Assert that a slice field holds `expected`
    ///
    /// # Panics
    ///
    /// Panics if the field is missing or differs.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_field(state: &Value, name: &str, expected: &Value) {
        match state.get(name) {
            Some(actual) => assert_eq!(actual, expected, "Field {name} differs"),
            None => panic!("Field {name} missing from {state}"),
        }
    }

    /// Assert that a slice field is absent
    ///
    /// # Panics
    ///
    /// Panics if the field is present.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_field(state: &Value, name: &str) {
        assert!(
            state.get(name).is_none(),
            "Expected no field {name}, found {state}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isomorph_core::Value;
    use isomorph_core::composition::SliceReducer;
    use serde_json::json;

    #[test]
    fn test_set_replaces_field() {
        ReducerTest::new(SliceReducer::new("req"))
            .given_state(json!({"path": "/a"}))
            .when_action(Action::set("req", "path", json!("/b")))
            .then_state(|state| {
                assertions::assert_field(state, "path", &json!("/b"));
            })
            .run();
    }

    #[test]
    fn test_other_slice_is_ignored() {
        ReducerTest::new(SliceReducer::new("req"))
            .given_state(json!({}))
            .when_action(Action::set("res", "statusCode", json!(200)))
            .then_state(|state| {
                assertions::assert_no_field(state, "statusCode");
            })
            .run();
    }

    #[test]
    fn test_non_object_slice_fails() {
        ReducerTest::new(SliceReducer::new("req"))
            .given_state(json!(3))
            .when_action(Action::set("req", "path", json!("/")))
            .then_error(|error| {
                assert!(matches!(error, StateError::NotAnObject { .. }));
            })
            .run();
    }

    struct Counter;

    impl Reducer for Counter {
        type State = Value;

        fn reduce(&self, state: &Value, action: &Action) -> Result<Value, StateError> {
            Ok(if action.kind == "INCREMENT" {
                json!(state.as_i64().unwrap_or(0) + 1)
            } else {
                state.clone()
            })
        }
    }

    #[test]
    fn test_actions_apply_in_order() {
        ReducerTest::new(Counter)
            .given_state(json!(0))
            .when_action(Action::new("INCREMENT", "", Value::Null))
            .when_action(Action::new("RESET_IGNORED", "", Value::Null))
            .when_action(Action::new("INCREMENT", "", Value::Null))
            .then_state(|state| assert_eq!(state, &json!(2)))
            .run();
    }
}
