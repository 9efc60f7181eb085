//! Listener and global route table management
//!
//! Each namespace with Workloads gets one listener proxy (`<ns>-listener`)
//! pointing at the namespace's event listener service. A shared global route
//! table delegates `/<ns>` to that listener through an include entry. The
//! route table is edited by many reconciles at once, so every change is a
//! read-modify-write guarded by resourceVersion and retried on conflict.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use tracing::{debug, info, instrument, warn};

use forge_common::crd::{HttpProxy, HttpProxySpec, Include, MatchCondition, Route, RouteService};
use forge_common::metrics::record_route_write;
use forge_common::retry::RetryPolicy;
use forge_common::{Error, ErrorClass};

use crate::store::RouteStore;

/// Port the listener forwards to on the backend service
pub const LISTENER_BACKEND_PORT: i32 = 8080;

/// Default namespace of the global route table
pub const DEFAULT_ROUTE_TABLE_NAMESPACE: &str = "argocd";

/// Default name of the global route table
pub const DEFAULT_ROUTE_TABLE_NAME: &str = "proxy-to-listener";

/// Name of the listener proxy for a namespace
pub fn listener_name(namespace: &str) -> String {
    format!("{namespace}-listener")
}

/// Location of the shared route table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTableRef {
    /// Namespace of the table
    pub namespace: String,
    /// Name of the table
    pub name: String,
}

impl Default for RouteTableRef {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_ROUTE_TABLE_NAMESPACE.to_string(),
            name: DEFAULT_ROUTE_TABLE_NAME.to_string(),
        }
    }
}

/// What an ensure step did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteChange {
    /// Object created
    Created,
    /// Object rewritten
    Updated,
    /// Already as desired; nothing written
    Unchanged,
    /// Step skipped because the shared table does not exist
    Skipped,
}

/// Desired listener proxy for a namespace
pub fn desired_listener(namespace: &str, backend_service: &str) -> HttpProxy {
    HttpProxy {
        metadata: ObjectMeta {
            name: Some(listener_name(namespace)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: HttpProxySpec {
            routes: vec![Route {
                services: vec![RouteService {
                    name: backend_service.to_string(),
                    port: LISTENER_BACKEND_PORT,
                    extra: BTreeMap::new(),
                }],
                extra: BTreeMap::new(),
            }],
            ..Default::default()
        },
    }
}

/// The include entry delegating `/<ns>` to the namespace's listener
pub fn canonical_include(namespace: &str) -> Include {
    Include {
        name: listener_name(namespace),
        namespace: Some(namespace.to_string()),
        conditions: vec![MatchCondition {
            prefix: Some(format!("/{namespace}")),
            extra: BTreeMap::new(),
        }],
        extra: BTreeMap::new(),
    }
}

/// Includes with exactly one canonical entry for `namespace`.
///
/// Returns `None` when `includes` already satisfies that, so callers can
/// skip the write. Entries for other namespaces keep their order.
pub fn merge_include(includes: &[Include], namespace: &str) -> Option<Vec<Include>> {
    let listener = listener_name(namespace);
    let canonical = canonical_include(namespace);

    let matching: Vec<&Include> = includes
        .iter()
        .filter(|i| i.targets(namespace, &listener))
        .collect();
    if matching.len() == 1 && *matching[0] == canonical {
        return None;
    }

    let mut merged: Vec<Include> = includes
        .iter()
        .filter(|i| !i.targets(namespace, &listener))
        .cloned()
        .collect();
    merged.push(canonical);
    Some(merged)
}

/// Includes with every entry for `namespace` removed, `None` if there were none
pub fn remove_include(includes: &[Include], namespace: &str) -> Option<Vec<Include>> {
    let listener = listener_name(namespace);
    if !includes.iter().any(|i| i.targets(namespace, &listener)) {
        return None;
    }
    Some(
        includes
            .iter()
            .filter(|i| !i.targets(namespace, &listener))
            .cloned()
            .collect(),
    )
}

/// Keeps listener proxies and the shared route table in step with Workloads
pub struct RouteManager {
    store: Arc<dyn RouteStore>,
    table: RouteTableRef,
    retry: RetryPolicy<Error>,
}

impl RouteManager {
    /// Create a manager with the default conflict retry policy
    pub fn new(store: Arc<dyn RouteStore>, table: RouteTableRef) -> Self {
        Self {
            store,
            table,
            retry: RetryPolicy::transient_conflicts(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy<Error>) -> Self {
        self.retry = retry;
        self
    }

    /// Ensure both the namespace listener and its route table include
    pub async fn ensure(&self, namespace: &str, backend_service: &str) -> Result<(), Error> {
        self.ensure_listener(namespace, backend_service).await?;
        self.ensure_include(namespace).await?;
        Ok(())
    }

    /// Create the listener, or repoint it when its backend service differs
    #[instrument(skip(self), fields(listener = %listener_name(namespace)))]
    pub async fn ensure_listener(
        &self,
        namespace: &str,
        backend_service: &str,
    ) -> Result<RouteChange, Error> {
        let name = listener_name(namespace);
        self.retry
            .run("ensure-listener", || async {
                let Some(mut current) = self.store.get_proxy(namespace, &name).await? else {
                    return match self
                        .store
                        .create_proxy(&desired_listener(namespace, backend_service))
                        .await
                    {
                        Ok(()) => {
                            info!(backend = %backend_service, "created listener");
                            record_route_write("listener", "create");
                            Ok(RouteChange::Created)
                        }
                        // Lost a create race; the next reconcile verifies the backend
                        Err(e) if e.class() == ErrorClass::AlreadyExists => {
                            debug!("listener created concurrently");
                            Ok(RouteChange::Unchanged)
                        }
                        Err(e) => Err(e),
                    };
                };

                if current_backend(&current) == Some(backend_service) {
                    return Ok(RouteChange::Unchanged);
                }

                current.spec.routes = desired_listener(namespace, backend_service).spec.routes;
                self.store.replace_proxy(&current).await?;
                info!(backend = %backend_service, "updated listener backend");
                record_route_write("listener", "update");
                Ok(RouteChange::Updated)
            })
            .await
    }

    /// Ensure the route table holds exactly one canonical include for `namespace`
    #[instrument(skip(self), fields(table = %self.table.name))]
    pub async fn ensure_include(&self, namespace: &str) -> Result<RouteChange, Error> {
        self.retry
            .run("ensure-include", || async {
                let Some(mut table) = self.get_table().await? else {
                    warn!(
                        table_namespace = %self.table.namespace,
                        "route table not found; skipping include"
                    );
                    return Ok(RouteChange::Skipped);
                };

                let Some(includes) = merge_include(&table.spec.includes, namespace) else {
                    return Ok(RouteChange::Unchanged);
                };

                table.spec.includes = includes;
                self.store.replace_proxy(&table).await?;
                info!(namespace = %namespace, "added route table include");
                record_route_write("route_table", "update");
                Ok(RouteChange::Updated)
            })
            .await
    }

    /// Delete the namespace listener and remove its include.
    ///
    /// Both steps are attempted even if the first fails; the first failure
    /// is returned. A missing listener or table counts as done.
    #[instrument(skip(self))]
    pub async fn teardown(&self, namespace: &str) -> Result<(), Error> {
        let listener = self.delete_listener(namespace).await;
        if let Err(e) = &listener {
            warn!(error = %e, "failed to delete listener");
        }

        let include = self
            .retry
            .run("remove-include", || async {
                let Some(mut table) = self.get_table().await? else {
                    return Ok(());
                };
                let Some(includes) = remove_include(&table.spec.includes, namespace) else {
                    return Ok(());
                };
                table.spec.includes = includes;
                self.store.replace_proxy(&table).await?;
                info!(namespace = %namespace, "removed route table include");
                record_route_write("route_table", "update");
                Ok(())
            })
            .await;
        if let Err(e) = &include {
            warn!(error = %e, "failed to remove route table include");
        }

        listener.and(include)
    }

    async fn delete_listener(&self, namespace: &str) -> Result<(), Error> {
        let name = listener_name(namespace);
        self.retry
            .run("delete-listener", || async {
                if self.store.delete_proxy(namespace, &name).await? {
                    info!(listener = %name, "deleted listener");
                    record_route_write("listener", "delete");
                }
                Ok(())
            })
            .await
    }

    async fn get_table(&self) -> Result<Option<HttpProxy>, Error> {
        self.store
            .get_proxy(&self.table.namespace, &self.table.name)
            .await
    }
}

fn current_backend(proxy: &HttpProxy) -> Option<&str> {
    proxy
        .spec
        .routes
        .first()?
        .services
        .first()
        .map(|s| s.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRouteStore;
    use crate::store::MockRouteStore;
    use forge_common::retry::RetryConfig;
    use kube::core::ErrorResponse;
    use std::time::Duration;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    fn fast_retry(attempts: u32) -> RetryPolicy<Error> {
        RetryPolicy::new(
            RetryConfig {
                max_attempts: attempts,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
                jitter: 0.1,
            },
            Error::is_transient,
        )
    }

    fn route_table(includes: Vec<Include>) -> HttpProxy {
        let mut extra = BTreeMap::new();
        extra.insert(
            "virtualhost".to_string(),
            serde_json::json!({"fqdn": "hooks.example.com"}),
        );
        HttpProxy {
            metadata: ObjectMeta {
                name: Some(DEFAULT_ROUTE_TABLE_NAME.to_string()),
                namespace: Some(DEFAULT_ROUTE_TABLE_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: HttpProxySpec {
                includes,
                extra,
                ..Default::default()
            },
        }
    }

    fn manager(store: Arc<MemoryRouteStore>) -> RouteManager {
        RouteManager::new(store, RouteTableRef::default()).with_retry(fast_retry(5))
    }

    fn table_of(store: &MemoryRouteStore) -> HttpProxy {
        store
            .get(DEFAULT_ROUTE_TABLE_NAMESPACE, DEFAULT_ROUTE_TABLE_NAME)
            .unwrap()
    }

    // ==========================================================================
    // Pure include merging
    // ==========================================================================

    #[test]
    fn test_merge_include_adds_missing_entry() {
        let merged = merge_include(&[canonical_include("team-b")], "team-a").unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], canonical_include("team-b"));
        assert_eq!(merged[1], canonical_include("team-a"));
    }

    #[test]
    fn test_merge_include_is_noop_when_canonical_entry_present() {
        let includes = vec![canonical_include("team-b"), canonical_include("team-a")];
        assert!(merge_include(&includes, "team-a").is_none());
    }

    #[test]
    fn test_merge_include_collapses_duplicates_and_fixes_prefix() {
        let mut wrong_prefix = canonical_include("team-a");
        wrong_prefix.conditions[0].prefix = Some("/old".to_string());
        let includes = vec![
            wrong_prefix,
            canonical_include("team-b"),
            canonical_include("team-a"),
        ];

        let merged = merge_include(&includes, "team-a").unwrap();
        assert_eq!(
            merged,
            vec![canonical_include("team-b"), canonical_include("team-a")]
        );
    }

    #[test]
    fn test_remove_include() {
        let includes = vec![canonical_include("team-a"), canonical_include("team-b")];
        assert_eq!(
            remove_include(&includes, "team-a").unwrap(),
            vec![canonical_include("team-b")]
        );
        assert!(remove_include(&includes, "team-c").is_none());
    }

    #[test]
    fn test_desired_listener_shape() {
        let listener = desired_listener("team-a", "el-simple-listener");
        assert_eq!(listener.metadata.name.as_deref(), Some("team-a-listener"));
        assert_eq!(current_backend(&listener), Some("el-simple-listener"));
        assert_eq!(listener.spec.routes[0].services[0].port, 8080);
    }

    // ==========================================================================
    // Story Tests: Listener lifecycle
    // ==========================================================================

    /// Story: the first Workload in a namespace creates its listener
    #[tokio::test]
    async fn story_missing_listener_is_created() {
        let store = Arc::new(MemoryRouteStore::new());
        let change = manager(store.clone())
            .ensure_listener("team-a", "el-simple-listener")
            .await
            .unwrap();
        assert_eq!(change, RouteChange::Created);

        let listener = store.get("team-a", "team-a-listener").unwrap();
        assert_eq!(current_backend(&listener), Some("el-simple-listener"));
    }

    /// Story: an unchanged listener is not rewritten
    #[tokio::test]
    async fn story_matching_listener_is_left_alone() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(desired_listener("team-a", "el-simple-listener"));
        let writes = store.writes();

        let change = manager(store.clone())
            .ensure_listener("team-a", "el-simple-listener")
            .await
            .unwrap();
        assert_eq!(change, RouteChange::Unchanged);
        assert_eq!(store.writes(), writes);
    }

    /// Story: a changed backend service repoints the listener
    #[tokio::test]
    async fn story_listener_follows_backend_change() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(desired_listener("team-a", "el-simple-listener"));

        let change = manager(store.clone())
            .ensure_listener("team-a", "el-custom")
            .await
            .unwrap();
        assert_eq!(change, RouteChange::Updated);
        let listener = store.get("team-a", "team-a-listener").unwrap();
        assert_eq!(current_backend(&listener), Some("el-custom"));
    }

    /// Story: losing a create race is not an error
    #[tokio::test]
    async fn story_listener_create_race_is_tolerated() {
        let mut store = MockRouteStore::new();
        store.expect_get_proxy().returning(|_, _| Ok(None));
        store
            .expect_create_proxy()
            .times(1)
            .returning(|_| Err(api_error(409, "AlreadyExists")));

        let manager = RouteManager::new(Arc::new(store), RouteTableRef::default())
            .with_retry(fast_retry(5));
        let change = manager.ensure_listener("team-a", "svc").await.unwrap();
        assert_eq!(change, RouteChange::Unchanged);
    }

    // ==========================================================================
    // Story Tests: Shared route table
    // ==========================================================================

    /// Story: ensuring an include leaves unrelated configuration untouched
    #[tokio::test]
    async fn story_include_added_without_disturbing_other_entries() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![canonical_include("team-b")]));

        let change = manager(store.clone()).ensure_include("team-a").await.unwrap();
        assert_eq!(change, RouteChange::Updated);

        let table = table_of(&store);
        assert_eq!(
            table.spec.includes,
            vec![canonical_include("team-b"), canonical_include("team-a")]
        );
        assert!(table.spec.extra.contains_key("virtualhost"));
    }

    /// Story: a missing route table skips the include step
    #[tokio::test]
    async fn story_missing_route_table_is_skipped() {
        let store = Arc::new(MemoryRouteStore::new());
        let change = manager(store.clone()).ensure_include("team-a").await.unwrap();
        assert_eq!(change, RouteChange::Skipped);
        assert_eq!(store.writes(), 0);
    }

    /// Story: a conflicting write is retried against a fresh read
    #[tokio::test]
    async fn story_conflicts_are_retried() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![]));
        store.inject_conflicts(2);

        let change = manager(store.clone()).ensure_include("team-a").await.unwrap();
        assert_eq!(change, RouteChange::Updated);
        assert_eq!(table_of(&store).spec.includes, vec![canonical_include("team-a")]);
    }

    /// Story: conflicts beyond the attempt budget surface as errors
    #[tokio::test]
    async fn story_exhausted_retries_return_conflict() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![]));
        store.inject_conflicts(10);

        let err = RouteManager::new(store.clone(), RouteTableRef::default())
            .with_retry(fast_retry(3))
            .ensure_include("team-a")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    /// Story: non-transient errors are not retried
    #[tokio::test]
    async fn story_permission_errors_are_returned_immediately() {
        let mut store = MockRouteStore::new();
        store
            .expect_get_proxy()
            .times(1)
            .returning(|_, _| Err(api_error(403, "Forbidden")));

        let manager = RouteManager::new(Arc::new(store), RouteTableRef::default())
            .with_retry(fast_retry(5));
        let err = manager.ensure_include("team-a").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
    }

    /// Story: many reconciles ensuring the same namespace leave one entry
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn story_concurrent_ensures_leave_exactly_one_include() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![canonical_include("team-b")]));
        let manager = Arc::new(manager(store.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_include("team-a").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let includes = table_of(&store).spec.includes;
        assert_eq!(
            includes,
            vec![canonical_include("team-b"), canonical_include("team-a")]
        );
    }

    /// Story: concurrent ensures for different namespaces all land
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn story_concurrent_namespaces_do_not_lose_updates() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![]));
        let manager = Arc::new(
            RouteManager::new(store.clone(), RouteTableRef::default()).with_retry(fast_retry(50)),
        );

        let namespaces: Vec<String> = (0..6).map(|i| format!("team-{i}")).collect();
        let tasks: Vec<_> = namespaces
            .iter()
            .cloned()
            .map(|ns| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_include(&ns).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let includes = table_of(&store).spec.includes;
        assert_eq!(includes.len(), namespaces.len());
        for ns in &namespaces {
            assert_eq!(
                includes.iter().filter(|i| i.targets(ns, &listener_name(ns))).count(),
                1
            );
        }
    }

    // ==========================================================================
    // Story Tests: Teardown
    // ==========================================================================

    /// Story: teardown removes the listener and only this namespace's include
    #[tokio::test]
    async fn story_teardown_removes_listener_and_include() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(desired_listener("team-a", "svc"));
        store.insert(route_table(vec![
            canonical_include("team-a"),
            canonical_include("team-b"),
        ]));

        manager(store.clone()).teardown("team-a").await.unwrap();

        assert!(store.get("team-a", "team-a-listener").is_none());
        assert_eq!(table_of(&store).spec.includes, vec![canonical_include("team-b")]);
    }

    /// Story: teardown of an already-clean namespace is a no-op
    #[tokio::test]
    async fn story_teardown_is_idempotent() {
        let store = Arc::new(MemoryRouteStore::new());
        store.insert(route_table(vec![canonical_include("team-b")]));

        let manager = manager(store.clone());
        manager.teardown("team-a").await.unwrap();
        manager.teardown("team-a").await.unwrap();
        assert_eq!(store.writes(), 0);

        // No route table at all is fine too
        let empty = Arc::new(MemoryRouteStore::new());
        RouteManager::new(empty, RouteTableRef::default())
            .teardown("team-a")
            .await
            .unwrap();
    }

    /// Story: a failed listener delete does not stop include removal
    #[tokio::test]
    async fn story_teardown_attempts_both_steps() {
        let mut store = MockRouteStore::new();
        store
            .expect_delete_proxy()
            .times(1)
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        store.expect_get_proxy().times(1).returning(|_, _| {
            Ok(Some(route_table(vec![canonical_include("team-a")])))
        });
        store
            .expect_replace_proxy()
            .withf(|table: &HttpProxy| table.spec.includes.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let manager = RouteManager::new(Arc::new(store), RouteTableRef::default())
            .with_retry(fast_retry(5));
        let err = manager.teardown("team-a").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
    }
}
