//! Testing utilities for the provider.
//!
//! [`MemoryStore`] is an in-memory [`InstanceStore`] so controller and
//! provider behaviour can be exercised without a running Skiff server. It
//! supports per-operation failure injection (to drive the compensation
//! paths) and *echo withholding*: accepting a written attribute but omitting
//! it from subsequent reads, which is exactly the server behaviour state
//! reconciliation exists to absorb.
//!
//! # Example
//!
//! ```
//! use skiff_provider::testing::MemoryStore;
//! use skiff_provider::store::{InstanceStore, InstanceState};
//!
//! # async fn example() -> Result<(), skiff_provider::ProviderError> {
//! let store = MemoryStore::new();
//! store.fail_updates();
//!
//! store.create_instance("httpserver.main").await?;
//! assert!(store
//!     .update_instance("httpserver.main", InstanceState::new(), true)
//!     .await
//!     .is_err());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::ProviderError;
use crate::store::{InstanceState, InstanceStore, ResourceMeta};

#[derive(Default)]
struct MemoryStoreInner {
    instances: HashMap<String, InstanceState>,
    resource_types: Vec<ResourceMeta>,
    withheld: HashSet<String>,
    fail_create: bool,
    fail_update: bool,
    fail_get: bool,
    fail_destroy: bool,
    fail_list: bool,
}

/// An in-memory instance store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose discovery endpoint reports the given resource
    /// types.
    pub fn with_resource_types(resource_types: Vec<ResourceMeta>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().resource_types = resource_types;
        store
    }

    /// Seed an instance directly, bypassing the transport.
    pub fn seed_instance(&self, identity: impl Into<String>, state: InstanceState) {
        self.inner
            .lock()
            .unwrap()
            .instances
            .insert(identity.into(), state);
    }

    /// The current state of an instance, if it exists.
    pub fn instance(&self, identity: &str) -> Option<InstanceState> {
        self.inner.lock().unwrap().instances.get(identity).cloned()
    }

    /// All instance identities currently stored, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> =
            self.inner.lock().unwrap().instances.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Accept writes to the given attribute but omit it from reads.
    pub fn withhold(&self, attribute: impl Into<String>) {
        self.inner.lock().unwrap().withheld.insert(attribute.into());
    }

    /// Make subsequent `create_instance` calls fail.
    pub fn fail_creates(&self) {
        self.inner.lock().unwrap().fail_create = true;
    }

    /// Make subsequent `update_instance` calls fail.
    pub fn fail_updates(&self) {
        self.inner.lock().unwrap().fail_update = true;
    }

    /// Make subsequent `get_instance` calls fail.
    pub fn fail_gets(&self) {
        self.inner.lock().unwrap().fail_get = true;
    }

    /// Make subsequent `destroy_instance` calls fail.
    pub fn fail_destroys(&self) {
        self.inner.lock().unwrap().fail_destroy = true;
    }

    /// Make subsequent `list_resource_types` calls fail.
    pub fn fail_lists(&self) {
        self.inner.lock().unwrap().fail_list = true;
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, identity: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create {
            return Err(ProviderError::Transport(format!(
                "create {}: injected failure",
                identity
            )));
        }
        if inner.instances.contains_key(identity) {
            return Err(ProviderError::Transport(format!(
                "create {}: instance already exists",
                identity
            )));
        }
        inner.instances.insert(identity.to_string(), InstanceState::new());
        Ok(())
    }

    async fn update_instance(
        &self,
        identity: &str,
        attributes: InstanceState,
        _apply: bool,
    ) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_update {
            return Err(ProviderError::Transport(format!(
                "update {}: injected failure",
                identity
            )));
        }
        match inner.instances.get_mut(identity) {
            Some(state) => {
                state.extend(attributes);
                Ok(())
            }
            None => Err(ProviderError::Transport(format!(
                "update {}: no such instance",
                identity
            ))),
        }
    }

    async fn get_instance(&self, identity: &str) -> Result<InstanceState, ProviderError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_get {
            return Err(ProviderError::Transport(format!(
                "get {}: injected failure",
                identity
            )));
        }
        match inner.instances.get(identity) {
            Some(state) => Ok(state
                .iter()
                .filter(|(key, _)| !inner.withheld.contains(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()),
            None => Err(ProviderError::Transport(format!(
                "get {}: no such instance",
                identity
            ))),
        }
    }

    async fn destroy_instance(&self, identity: &str, _force: bool) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_destroy {
            return Err(ProviderError::Transport(format!(
                "destroy {}: injected failure",
                identity
            )));
        }
        if inner.instances.remove(identity).is_none() {
            return Err(ProviderError::Transport(format!(
                "destroy {}: no such instance",
                identity
            )));
        }
        Ok(())
    }

    async fn list_resource_types(&self) -> Result<Vec<ResourceMeta>, ProviderError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list {
            return Err(ProviderError::Transport(
                "list resource types: injected failure".to_string(),
            ));
        }
        Ok(inner.resource_types.clone())
    }
}
