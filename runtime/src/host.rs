//! Application-lifetime host state.
//!
//! Each value here is initialised at most once for the lifetime of an application:
//! the hydration snapshot the client booted from and the store the client keeps
//! across navigations.

use std::sync::OnceLock;

use isomorph_core::Value;
use isomorph_core::config::Target;

use crate::store::Store;

/// Host-wide values shared by every dispatch of one application.
#[derive(Debug, Default)]
pub struct HostScope {
    target: Target,
    snapshot: OnceLock<Value>,
    last_client_store: OnceLock<Store>,
}

impl HostScope {
    /// Scope for an application running on `target`.
    #[must_use]
    pub const fn new(target: Target) -> Self {
        Self {
            target,
            snapshot: OnceLock::new(),
            last_client_store: OnceLock::new(),
        }
    }

    /// Host this application runs on.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// Whether this is the client host.
    #[must_use]
    pub const fn is_client(&self) -> bool {
        self.target.is_client()
    }

    /// Install the snapshot embedded by the server. Returns `false` if one was
    /// already installed; the first one is kept.
    pub fn install_snapshot(&self, snapshot: Value) -> bool {
        let installed = self.snapshot.set(snapshot).is_ok();
        if !installed {
            tracing::warn!("Hydration snapshot already installed, ignoring");
        }
        installed
    }

    /// The snapshot the client booted from.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.get()
    }

    /// Remember the client's store. Returns `false` if one is already remembered.
    pub fn remember_client_store(&self, store: Store) -> bool {
        self.last_client_store.set(store).is_ok()
    }

    /// The store reused by every client navigation.
    #[must_use]
    pub fn last_client_store(&self) -> Option<&Store> {
        self.last_client_store.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isomorph_core::StateMap;
    use isomorph_core::composition::SliceReducers;
    use serde_json::json;

    #[test]
    fn values_are_set_once() {
        let host = HostScope::new(Target::Client);
        assert!(host.is_client());
        assert!(host.install_snapshot(json!({"req": {}})));
        assert!(!host.install_snapshot(json!({"other": {}})));
        assert_eq!(host.snapshot(), Some(&json!({"req": {}})));

        let first = Store::new(SliceReducers::request_response(), StateMap::new());
        let second = Store::new(SliceReducers::request_response(), StateMap::new());
        assert!(host.remember_client_store(first.clone()));
        assert!(!host.remember_client_store(second));
        assert!(host.last_client_store().is_some_and(|store| Store::ptr_eq(store, &first)));
    }
}
