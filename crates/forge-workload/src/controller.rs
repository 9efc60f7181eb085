//! Workload controller implementation
//!
//! Each invocation re-reads the Workload and takes exactly one lifecycle
//! transition:
//!
//! - deleting: tear down routes and runs, then release the finalizer
//! - no finalizer yet: add it and come back
//! - live: create this generation's run if it has none, mirror the latest
//!   run into status, and keep the namespace's routes in place
//!
//! Every write to the Workload is a read-modify-write carrying the read
//! resourceVersion; conflicts are retried by re-reading and recomputing.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use forge_common::crd::{
    set_condition, Condition, ConditionStatus, Lifecycle, Workload, WorkloadStatus,
};
use forge_common::kube_utils::{finalizers_with, finalizers_without, has_finalizer, status_patch};
use forge_common::metrics::ReconcileTimer;
use forge_common::retry::RetryPolicy;
use forge_common::{Error, ErrorClass, WORKLOAD_FINALIZER};
use forge_git::{GitCredentials, RevisionResolver};
use forge_ingress::{KubeRouteStore, RouteManager, RouteTableRef};

use crate::client::{RunCreation, WorkloadKubeClient, WorkloadKubeClientImpl};
use crate::config::{
    WorkloadConfig, ANNOTATION_GIT_SECRET, ANNOTATION_GIT_TOKEN, ANNOTATION_LISTENER_SERVICE,
    DEFAULT_GIT_SECRET, DEFAULT_LISTENER_SERVICE,
};
use crate::pipeline::{bind_workspaces, build_params, build_pipeline_run, run_name};
use crate::status::{
    apply_run, is_converged, latest_run, record_run, PIPELINE_AVAILABLE, READY, SOURCE_RESOLVED,
};

/// Controller context for Workload reconciliation
pub struct Context {
    /// Kubernetes client (trait object for testability)
    pub kube: Arc<dyn WorkloadKubeClient>,
    /// Shared branch head resolver
    pub resolver: Arc<RevisionResolver>,
    /// Listener and route table management
    pub routes: Arc<RouteManager>,
    /// Process-wide settings
    pub config: WorkloadConfig,
    /// Policy for conflicting Workload writes
    pub retry: RetryPolicy<Error>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn WorkloadKubeClient>,
        resolver: Arc<RevisionResolver>,
        routes: Arc<RouteManager>,
        config: WorkloadConfig,
    ) -> Self {
        Self {
            kube,
            resolver,
            routes,
            config,
            retry: RetryPolicy::transient_conflicts(),
        }
    }

    /// Override the retry policy for Workload writes
    pub fn with_retry(mut self, retry: RetryPolicy<Error>) -> Self {
        self.retry = retry;
        self
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .route_table(table)
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    config: WorkloadConfig,
    route_table: RouteTableRef,
    resolver: Option<Arc<RevisionResolver>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            config: WorkloadConfig::default(),
            route_table: RouteTableRef::default(),
            resolver: None,
        }
    }

    /// Process-wide settings
    pub fn config(mut self, config: WorkloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Location of the global route table
    pub fn route_table(mut self, table: RouteTableRef) -> Self {
        self.route_table = table;
        self
    }

    /// Share an existing resolver (and its cache)
    pub fn resolver(mut self, resolver: Arc<RevisionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the context
    pub fn build(self) -> Context {
        let store = Arc::new(KubeRouteStore::new(self.client.clone()));
        Context {
            kube: Arc::new(WorkloadKubeClientImpl::new(self.client)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(RevisionResolver::from_env())),
            routes: Arc::new(RouteManager::new(store, self.route_table)),
            config: self.config,
            retry: RetryPolicy::transient_conflicts(),
        }
    }
}

/// Reconcile a Workload
///
/// The whole invocation runs under the configured deadline; when it
/// expires the in-flight work is dropped and a timeout error is returned
/// so the dispatcher requeues.
#[instrument(
    skip(workload, ctx),
    fields(workload = %workload.name_any(), namespace = %workload.namespace().unwrap_or_default())
)]
pub async fn reconcile(workload: Arc<Workload>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("workload");
    let namespace = workload
        .namespace()
        .ok_or_else(|| Error::validation("workload has no namespace"))?;
    let name = workload.name_any();
    let deadline = ctx.config.reconcile_timeout;

    let result =
        match tokio::time::timeout(deadline, reconcile_workload(&namespace, &name, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("workload reconcile", deadline)),
        };
    timer.finish(result)
}

async fn reconcile_workload(namespace: &str, name: &str, ctx: &Context) -> Result<Action, Error> {
    let workload = match ctx.kube.get_workload(namespace, name).await {
        Ok(Some(workload)) => workload,
        Ok(None) => {
            debug!("workload no longer exists");
            return Ok(Action::await_change());
        }
        Err(e) if e.class() == ErrorClass::PermissionDenied => {
            warn!(error = %e, "not permitted to read workload");
            return Ok(Action::requeue(e.requeue_after()));
        }
        Err(e) => return Err(e),
    };

    match workload.lifecycle(WORKLOAD_FINALIZER) {
        Lifecycle::Released => Ok(Action::await_change()),
        Lifecycle::Finalizing => finalize(&workload, namespace, ctx).await,
        Lifecycle::NeedsFinalizer => {
            info!("adding finalizer");
            add_finalizer(namespace, name, ctx).await?;
            Ok(Action::requeue(Duration::ZERO))
        }
        Lifecycle::Active => converge(&workload, namespace, ctx).await,
    }
}

/// Whether a cleanup failure should hold the finalizer and retry
fn blocks_finalization(err: &Error) -> bool {
    err.is_transient() || err.class() == ErrorClass::Unclassified
}

async fn finalize(workload: &Workload, namespace: &str, ctx: &Context) -> Result<Action, Error> {
    let name = workload.name_any();
    info!("cleaning up workload");

    let teardown = ctx.routes.teardown(namespace).await;
    let runs = ctx.kube.delete_pipeline_runs(namespace, &name).await;

    let failures: Vec<Error> = [teardown.err(), runs.err()].into_iter().flatten().collect();
    for e in &failures {
        warn!(error = %e, class = %e.class(), "cleanup step failed");
    }
    if let Some(e) = failures.into_iter().find(blocks_finalization) {
        return Err(e);
    }

    remove_finalizer(namespace, &name, ctx).await?;
    info!("released workload");
    Ok(Action::await_change())
}

async fn add_finalizer(namespace: &str, name: &str, ctx: &Context) -> Result<(), Error> {
    ctx.retry
        .run("add-finalizer", || async {
            let Some(workload) = ctx.kube.get_workload(namespace, name).await? else {
                return Ok(());
            };
            if workload.metadata.deletion_timestamp.is_some()
                || has_finalizer(&workload.metadata, WORKLOAD_FINALIZER)
            {
                return Ok(());
            }
            ctx.kube
                .patch_finalizers(
                    namespace,
                    name,
                    workload.resource_version(),
                    finalizers_with(&workload.metadata, WORKLOAD_FINALIZER),
                )
                .await
        })
        .await
}

async fn remove_finalizer(namespace: &str, name: &str, ctx: &Context) -> Result<(), Error> {
    let result = ctx
        .retry
        .run("remove-finalizer", || async {
            let Some(workload) = ctx.kube.get_workload(namespace, name).await? else {
                return Ok(());
            };
            if !has_finalizer(&workload.metadata, WORKLOAD_FINALIZER) {
                return Ok(());
            }
            ctx.kube
                .patch_finalizers(
                    namespace,
                    name,
                    workload.resource_version(),
                    finalizers_without(&workload.metadata, WORKLOAD_FINALIZER),
                )
                .await
        })
        .await;

    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

async fn converge(workload: &Workload, namespace: &str, ctx: &Context) -> Result<Action, Error> {
    let name = workload.name_any();
    let generation = workload.metadata.generation.unwrap_or_default();
    let status = workload.status.clone().unwrap_or_default();

    let mut next = Action::requeue(ctx.config.settled_requeue);
    if is_converged(&status, generation) {
        debug!(generation, "generation already has a run");
    } else if let Err(e) = launch_run(workload, namespace, generation, ctx).await {
        next = surface_failure(namespace, &name, generation, e, ctx).await?;
    }

    sync_run_status(namespace, &name, generation, ctx).await?;

    let backend = workload
        .annotation(ANNOTATION_LISTENER_SERVICE)
        .unwrap_or(DEFAULT_LISTENER_SERVICE);
    ctx.routes.ensure(namespace, backend).await?;

    Ok(next)
}

/// Create the run for `generation` and record it in status.
///
/// The status write happens after the create; if it is lost, the next
/// invocation finds the run already present and records it then.
async fn launch_run(
    workload: &Workload,
    namespace: &str,
    generation: i64,
    ctx: &Context,
) -> Result<(), Error> {
    let name = workload.name_any();
    let target = workload.git_target()?;

    let pipeline_name = ctx.config.pipeline_name.as_str();
    let pipeline = ctx
        .kube
        .get_pipeline(namespace, pipeline_name)
        .await?
        .ok_or_else(|| Error::dependency_not_found("Pipeline", namespace, pipeline_name))?;

    let revision = match &target.revision {
        Some(pinned) => pinned.clone(),
        None => {
            let credentials = git_credentials(workload, namespace, ctx).await?;
            ctx.resolver
                .resolve(&target.url, &target.branch, credentials)
                .await?
        }
    };

    let params = build_params(workload, &target, &revision, &ctx.config.image_repo);
    let workspaces = bind_workspaces(ctx.kube.as_ref(), workload, &pipeline).await?;
    let run_name = run_name(&name, generation);
    let run = build_pipeline_run(
        workload,
        &run_name,
        pipeline_name,
        generation,
        params,
        workspaces,
    )?;

    match ctx.kube.create_pipeline_run(&run).await? {
        RunCreation::Created => {
            info!(run = %run_name, revision = %revision, generation, "created pipeline run")
        }
        RunCreation::AlreadyExists => debug!(run = %run_name, "pipeline run already exists"),
    }

    let resolved = format!("building {revision}");
    update_status(namespace, &name, ctx, |status| {
        record_run(status, &run_name, generation);
        set_condition(
            &mut status.conditions,
            Condition::new(SOURCE_RESOLVED, ConditionStatus::True, "Resolved", &resolved)
                .with_generation(generation),
        );
        set_condition(
            &mut status.conditions,
            Condition::new(
                PIPELINE_AVAILABLE,
                ConditionStatus::True,
                "Found",
                format!("pipeline {pipeline_name} found"),
            )
            .with_generation(generation),
        );
    })
    .await
}

async fn git_credentials(
    workload: &Workload,
    namespace: &str,
    ctx: &Context,
) -> Result<Option<GitCredentials>, Error> {
    if let Some(token) = workload.annotation(ANNOTATION_GIT_TOKEN) {
        return Ok(Some(GitCredentials::token(token)));
    }

    let secret_name = workload
        .annotation(ANNOTATION_GIT_SECRET)
        .unwrap_or(DEFAULT_GIT_SECRET);
    let credentials = ctx
        .kube
        .get_secret(namespace, secret_name)
        .await?
        .and_then(|secret| GitCredentials::from_secret(&secret));
    if credentials.is_none() {
        debug!(secret = %secret_name, "no usable git credentials; querying anonymously");
    }
    Ok(credentials)
}

/// Turn a launch failure into a condition and a requeue, or propagate it
async fn surface_failure(
    namespace: &str,
    name: &str,
    generation: i64,
    err: Error,
    ctx: &Context,
) -> Result<Action, Error> {
    let (condition_type, reason, next) = match err.class() {
        ErrorClass::MalformedSpec => (SOURCE_RESOLVED, "MalformedSpec", Action::await_change()),
        ErrorClass::ExternalResolution => (
            SOURCE_RESOLVED,
            "ResolutionFailed",
            Action::requeue(err.requeue_after()),
        ),
        ErrorClass::DependencyNotFound => (
            PIPELINE_AVAILABLE,
            "PipelineNotFound",
            Action::requeue(err.requeue_after()),
        ),
        ErrorClass::PermissionDenied => {
            warn!(error = %err, "permission denied while launching run");
            return Ok(Action::requeue(err.requeue_after()));
        }
        _ => return Err(err),
    };

    warn!(error = %err, reason, "cannot launch pipeline run");
    let message = err.to_string();
    update_status(namespace, name, ctx, |status| {
        set_condition(
            &mut status.conditions,
            Condition::new(condition_type, ConditionStatus::False, reason, &message)
                .with_generation(generation),
        );
        // Without any run, Ready has nothing better to say than this failure
        if status.last_pipeline_run.is_none() {
            set_condition(
                &mut status.conditions,
                Condition::new(READY, ConditionStatus::False, reason, &message)
                    .with_generation(generation),
            );
        }
    })
    .await?;
    Ok(next)
}

async fn sync_run_status(
    namespace: &str,
    name: &str,
    generation: i64,
    ctx: &Context,
) -> Result<(), Error> {
    let runs = ctx.kube.list_pipeline_runs(namespace, name).await?;
    let Some(latest) = latest_run(&runs) else {
        return Ok(());
    };
    update_status(namespace, name, ctx, |status| {
        apply_run(status, latest, generation)
    })
    .await
}

/// Re-read the Workload, apply `mutate` to its status and write it back if
/// anything changed
async fn update_status<F>(
    namespace: &str,
    name: &str,
    ctx: &Context,
    mutate: F,
) -> Result<(), Error>
where
    F: Fn(&mut WorkloadStatus) + Send + Sync,
{
    ctx.retry
        .run("update-workload-status", || async {
            let Some(workload) = ctx.kube.get_workload(namespace, name).await? else {
                return Ok(());
            };
            let current = workload.status.clone().unwrap_or_default();
            let mut next = current.clone();
            mutate(&mut next);
            if next == current {
                return Ok(());
            }
            let patch = status_patch(workload.resource_version().as_deref(), &current, &next)?;
            ctx.kube.patch_status(namespace, name, patch).await
        })
        .await
}

/// Error policy for the Workload controller
pub fn error_policy(workload: Arc<Workload>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        class = %error.class(),
        workload = %workload.name_any(),
        "reconciliation failed"
    );
    Action::requeue(error.requeue_after())
}
