//! Integration tests for what the running operator does to Workloads
//!
//! These require the operator to be deployed against the same cluster.

use std::time::Duration;

use kube::api::{Api, PostParams};
use kube::ResourceExt;

use forge_common::crd::Workload;
use forge_common::WORKLOAD_FINALIZER;

use super::helpers::{
    cleanup_workload, ensure_test_cluster, sample_workload, wait_for, TEST_NAMESPACE,
};

/// Story: The operator claims a new Workload
///
/// Before doing anything else the operator guards the Workload with its
/// cleanup finalizer, and deleting the Workload releases it again.
#[tokio::test]
#[ignore = "requires a cluster with the operator deployed"]
async fn story_operator_claims_new_workload() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Workload> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-lifecycle-claim";
    cleanup_workload(&client, name).await;

    api.create(&PostParams::default(), &sample_workload(name))
        .await
        .expect("failed to create workload");

    let claimed = wait_for(Duration::from_secs(60), || async {
        let workload = api.get(name).await.ok()?;
        workload
            .finalizers()
            .iter()
            .any(|f| f == WORKLOAD_FINALIZER)
            .then_some(())
    })
    .await;
    assert!(claimed.is_some(), "operator never added its finalizer");

    cleanup_workload(&client, name).await;

    let gone = wait_for(Duration::from_secs(120), || async {
        match api.get_opt(name).await {
            Ok(None) => Some(()),
            _ => None,
        }
    })
    .await;
    assert!(gone.is_some(), "workload was never released");
}

/// Story: A pinned Workload gets a run recorded in its status
///
/// The revision is pinned so no git lookup happens; the run is recorded
/// for the first generation and counted as a creation.
#[tokio::test]
#[ignore = "requires a cluster with the operator, Tekton and the pipeline installed"]
async fn story_pinned_workload_records_its_run() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Workload> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-lifecycle-run";
    cleanup_workload(&client, name).await;

    api.create(&PostParams::default(), &sample_workload(name))
        .await
        .expect("failed to create workload");

    let status = wait_for(Duration::from_secs(120), || async {
        let workload = api.get(name).await.ok()?;
        workload
            .status
            .filter(|s| s.observed_generation == Some(1) && s.last_pipeline_run.is_some())
    })
    .await
    .expect("operator never recorded a run");

    assert_eq!(status.create_count, 1);
    assert_eq!(status.update_count, 0);
    assert!(status
        .last_pipeline_run
        .as_deref()
        .is_some_and(|run| run.starts_with(name)));

    cleanup_workload(&client, name).await;
}
