//! Integration tests for Workload CRD operations

use kube::api::{Api, Patch, PatchParams, PostParams};

use forge_common::crd::Workload;

use super::helpers::{cleanup_workload, ensure_test_cluster, sample_workload, TEST_NAMESPACE};

/// Story: A developer registers a Workload
///
/// The spec is stored as written, including the pinned revision and the
/// user parameters.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_developer_registers_workload() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Workload> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-crd-create";
    cleanup_workload(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_workload(name))
        .await
        .expect("failed to create workload");
    assert_eq!(created.spec, sample_workload(name).spec);

    let fetched = api.get(name).await.expect("failed to get workload");
    let git = fetched.git_target().expect("stored source should be valid");
    assert_eq!(git.url, "https://github.com/example/petclinic.git");
    assert_eq!(git.branch, "main");
    assert_eq!(fetched.spec.params[0].name, "deploy");

    cleanup_workload(&client, name).await;
}

/// Story: Status lives on its own subresource
///
/// A status write leaves the spec alone, and a spec write does not touch
/// the status the controller recorded.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_is_a_subresource() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Workload> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-crd-status";
    cleanup_workload(&client, name).await;

    api.create(&PostParams::default(), &sample_workload(name))
        .await
        .expect("failed to create workload");

    let status = serde_json::json!({
        "status": { "lastPipelineRun": "test-crd-status-run-1", "createCount": 1 }
    });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status))
        .await
        .expect("failed to patch status");

    let spec = serde_json::json!({ "spec": { "env": ["MODE=test"] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&spec))
        .await
        .expect("failed to patch spec");

    let fetched = api.get(name).await.expect("failed to get workload");
    let status = fetched.status.expect("status should be stored");
    assert_eq!(status.create_count, 1);
    assert_eq!(status.last_pipeline_run.as_deref(), Some("test-crd-status-run-1"));
    assert_eq!(fetched.spec.env, vec!["MODE=test".to_string()]);
    assert_eq!(fetched.metadata.generation, Some(2));

    cleanup_workload(&client, name).await;
}
