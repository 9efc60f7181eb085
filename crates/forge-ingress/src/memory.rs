//! In-memory [`RouteStore`] with optimistic concurrency, for tests
//!
//! Behaves like the API server for the operations forge uses: replaces
//! carrying a stale resourceVersion fail with 409 Conflict, creates of an
//! existing name fail with 409 AlreadyExists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::ErrorResponse;

use forge_common::crd::HttpProxy;
use forge_common::Error;

use crate::store::RouteStore;

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// Route store backed by a map
#[derive(Default)]
pub struct MemoryRouteStore {
    objects: Mutex<BTreeMap<(String, String), HttpProxy>>,
    version: AtomicU64,
    writes: AtomicU32,
    injected_conflicts: AtomicU32,
}

impl MemoryRouteStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, assigning it a fresh resourceVersion
    pub fn insert(&self, mut proxy: HttpProxy) {
        let key = key_of(&proxy);
        proxy.metadata.resource_version = Some(self.next_version());
        self.lock().insert(key, proxy);
    }

    /// Current copy of an object
    pub fn get(&self, namespace: &str, name: &str) -> Option<HttpProxy> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of successful creates, replaces and deletes
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` replaces fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), HttpProxy>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn key_of(proxy: &HttpProxy) -> (String, String) {
    (
        proxy.metadata.namespace.clone().unwrap_or_default(),
        proxy.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn get_proxy(&self, namespace: &str, name: &str) -> Result<Option<HttpProxy>, Error> {
        Ok(self.get(namespace, name))
    }

    async fn create_proxy(&self, proxy: &HttpProxy) -> Result<(), Error> {
        let key = key_of(proxy);
        let mut objects = self.lock();
        if objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", key.1)));
        }
        let mut stored = proxy.clone();
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_proxy(&self, proxy: &HttpProxy) -> Result<(), Error> {
        if self.take_injected_conflict() {
            return Err(api_error(409, "Conflict", "injected conflict".to_string()));
        }

        let key = key_of(proxy);
        let mut objects = self.lock();
        let current = objects
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", key.1)))?;
        if current.metadata.resource_version != proxy.metadata.resource_version {
            return Err(api_error(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version"
                    .to_string(),
            ));
        }
        let mut stored = proxy.clone();
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_proxy(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let removed = self
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}
