//! Store actions.
//!
//! An action is `{type, payload: {name, value}}`. Two canonical families exist for
//! every slice: `SET_<SLICE>` overwrites `slice[name]`, and `INS_<SLICE>` shallow-merges
//! object values into `slice[name]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The operation encoded in a canonical action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `SET_<SLICE>`: overwrite the named field
    Set,
    /// `INS_<SLICE>`: shallow-merge into the named field when both sides are objects
    Insert,
}

impl Operation {
    /// The action type prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Insert => "INS",
        }
    }

    /// The full action type for a slice, e.g. `SET_REQ`.
    #[must_use]
    pub fn action_type(self, slice: &str) -> String {
        format!("{}_{}", self.prefix(), slice.to_uppercase())
    }
}

/// Payload of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Field within the slice
    pub name: String,
    /// New value
    pub value: Value,
}

/// A store action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type, e.g. `SET_RES`
    #[serde(rename = "type")]
    pub kind: String,
    /// Field name and value
    pub payload: Payload,
}

impl Action {
    /// Build an action with an arbitrary type.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Payload {
                name: name.into(),
                value,
            },
        }
    }

    /// `SET_<SLICE>` action.
    #[must_use]
    pub fn set(slice: &str, name: impl Into<String>, value: Value) -> Self {
        Self::new(Operation::Set.action_type(slice), name, value)
    }

    /// `INS_<SLICE>` action.
    #[must_use]
    pub fn insert(slice: &str, name: impl Into<String>, value: Value) -> Self {
        Self::new(Operation::Insert.action_type(slice), name, value)
    }

    /// The canonical operation this action performs on `slice`, if any.
    #[must_use]
    pub fn operation_on(&self, slice: &str) -> Option<Operation> {
        [Operation::Set, Operation::Insert]
            .into_iter()
            .find(|op| self.kind == op.action_type(slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_types_use_upper_case_slice() {
        assert_eq!(Action::set("req", "path", json!("/")).kind, "SET_REQ");
        assert_eq!(Action::insert("res", "responses", json!({})).kind, "INS_RES");
    }

    #[test]
    fn operation_is_resolved_per_slice() {
        let action = Action::insert("res", "responses", json!({}));
        assert_eq!(action.operation_on("res"), Some(Operation::Insert));
        assert_eq!(action.operation_on("req"), None);
        assert_eq!(Action::new("NAVIGATE", "to", json!("/")).operation_on("res"), None);
    }

    #[test]
    fn serializes_with_type_key() {
        let action = Action::set("res", "statusCode", json!(404));
        let value = serde_json::to_value(&action).unwrap_or_default();
        assert_eq!(
            value,
            json!({"type": "SET_RES", "payload": {"name": "statusCode", "value": 404}})
        );
    }
}
