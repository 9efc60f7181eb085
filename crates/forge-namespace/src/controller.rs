//! Cascade cleanup of terminating namespaces
//!
//! When a namespace labelled `forge.dev/enabled=true` starts terminating,
//! every pipeline and trigger resource in it is deleted and the namespace's
//! ingress routes are torn down. Failures are reported but never block the
//! namespace's deletion, which the platform owns.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use forge_common::metrics::ReconcileTimer;
use forge_common::retry::{RetryConfig, RetryPolicy};
use forge_common::{Error, NAMESPACE_ENABLED_LABEL};
use forge_ingress::{KubeRouteStore, RouteManager, RouteTableRef};

use crate::client::{CleanupKind, NamespaceKubeClient, NamespaceKubeClientImpl, CLEANUP_KINDS};

/// Attempts per kind before giving up on it
pub const DELETE_ATTEMPTS: u32 = 3;

/// Pause between attempts for one kind
pub const DELETE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Controller context for namespace cleanup
pub struct Context {
    /// Kubernetes client (trait object for testability)
    pub kube: Arc<dyn NamespaceKubeClient>,
    /// Listener and route table management
    pub routes: Arc<RouteManager>,
    /// Policy for each kind's delete-all
    pub retry: RetryPolicy<Error>,
}

impl Context {
    /// Create a context backed by the cluster
    pub fn new(client: Client, route_table: RouteTableRef) -> Self {
        let store = Arc::new(KubeRouteStore::new(client.clone()));
        Self::with_clients(
            Arc::new(NamespaceKubeClientImpl::new(client)),
            Arc::new(RouteManager::new(store, route_table)),
        )
    }

    /// Create a context from explicit collaborators
    pub fn with_clients(kube: Arc<dyn NamespaceKubeClient>, routes: Arc<RouteManager>) -> Self {
        Self {
            kube,
            routes,
            retry: RetryPolicy::always(RetryConfig::fixed(DELETE_ATTEMPTS, DELETE_RETRY_DELAY)),
        }
    }
}

/// A kind whose delete-all kept failing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindFailure {
    /// Kind name
    pub kind: &'static str,
    /// Last error
    pub error: String,
}

/// What a cascade cleanup achieved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupReport {
    /// Namespace that was cleaned
    pub namespace: String,
    /// Kinds emptied successfully
    pub deleted: Vec<&'static str>,
    /// Kinds that could not be emptied
    pub failed: Vec<KindFailure>,
    /// Outcome of the route teardown
    pub route_teardown: Result<(), String>,
}

impl CleanupReport {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            deleted: Vec::new(),
            failed: Vec::new(),
            route_teardown: Ok(()),
        }
    }

    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.route_teardown.is_ok()
    }
}

/// Whether forge manages this namespace
pub fn is_enabled(namespace: &Namespace) -> bool {
    namespace
        .labels()
        .get(NAMESPACE_ENABLED_LABEL)
        .is_some_and(|v| v == "true")
}

/// Reconcile a Namespace
///
/// Always succeeds: cleanup is best effort and the outcome is logged.
#[instrument(skip(namespace, ctx), fields(namespace = %namespace.name_any()))]
pub async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("namespace");
    let name = namespace.name_any();

    let current = match ctx.kube.get_namespace(&name).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            debug!("namespace already gone");
            return timer.finish(Ok(Action::await_change()));
        }
        Err(e) => {
            warn!(error = %e, "could not re-read namespace; using watched copy");
            namespace.as_ref().clone()
        }
    };

    if !is_enabled(&current) || current.metadata.deletion_timestamp.is_none() {
        return timer.finish(Ok(Action::await_change()));
    }

    info!("namespace terminating; cleaning up pipeline resources");
    let report = cascade_cleanup(&name, &ctx).await;
    if report.is_clean() {
        info!(kinds = report.deleted.len(), "namespace cleanup complete");
    } else {
        warn!(
            failed = ?report.failed,
            route_teardown = ?report.route_teardown,
            "namespace cleanup incomplete"
        );
    }

    timer.finish(Ok(Action::await_change()))
}

/// Delete every cleanup kind in order, then tear down the routes.
///
/// A kind that keeps failing is recorded and the next kind is still tried.
pub async fn cascade_cleanup(namespace: &str, ctx: &Context) -> CleanupReport {
    let mut report = CleanupReport::new(namespace);

    for kind in &CLEANUP_KINDS {
        match delete_kind(namespace, kind, ctx).await {
            Ok(()) => {
                debug!(kind = kind.kind, "deleted all");
                report.deleted.push(kind.kind);
            }
            Err(e) => {
                warn!(kind = kind.kind, error = %e, "giving up on kind");
                report.failed.push(KindFailure {
                    kind: kind.kind,
                    error: e.to_string(),
                });
            }
        }
    }

    report.route_teardown = ctx.routes.teardown(namespace).await.map_err(|e| e.to_string());
    report
}

async fn delete_kind(namespace: &str, kind: &CleanupKind, ctx: &Context) -> Result<(), Error> {
    let operation = format!("delete-all-{}", kind.kind);
    ctx.retry
        .run(&operation, || ctx.kube.delete_all_of(namespace, kind))
        .await
}

/// Error policy for the Namespace controller
pub fn error_policy(namespace: Arc<Namespace>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        ?error,
        namespace = %namespace.name_any(),
        "namespace reconciliation failed"
    );
    Action::requeue(error.requeue_after())
}
