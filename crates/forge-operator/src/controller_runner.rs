//! Controller runner - builds controller futures for each resource type
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use forge_common::crd::{PipelineRun, Workload};
use forge_common::NAMESPACE_ENABLED_LABEL;
use forge_git::RevisionResolver;
use forge_ingress::RouteTableRef;
use forge_workload::WorkloadConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Label selector limiting the namespace watch to managed namespaces
pub fn managed_namespace_selector() -> String {
    format!("{NAMESPACE_ENABLED_LABEL}=true")
}

/// Build the Workload controller future
///
/// Owned PipelineRuns are watched too so a run finishing triggers a
/// reconcile of its Workload.
pub fn build_workload_controllers(
    client: Client,
    config: WorkloadConfig,
    route_table: RouteTableRef,
    resolver: Arc<RevisionResolver>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(
        forge_workload::Context::builder(client.clone())
            .config(config)
            .route_table(route_table)
            .resolver(resolver)
            .build(),
    );
    let workloads: Api<Workload> = Api::all(client.clone());
    let runs: Api<PipelineRun> = Api::all(client);

    tracing::info!("- Workload controller");

    vec![Box::pin(
        Controller::new(
            workloads,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(runs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(
            forge_workload::reconcile,
            forge_workload::error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("Workload")),
    )]
}

/// Build the namespace cleanup controller future
pub fn build_namespace_controllers(
    client: Client,
    route_table: RouteTableRef,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(forge_namespace::Context::new(client.clone(), route_table));
    let namespaces: Api<Namespace> = Api::all(client);
    let selector = managed_namespace_selector();

    tracing::info!(selector = %selector, "- Namespace cleanup controller");

    vec![Box::pin(
        Controller::new(
            namespaces,
            WatcherConfig::default()
                .labels(&selector)
                .timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(
            forge_namespace::reconcile,
            forge_namespace::error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("Namespace")),
    )]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
