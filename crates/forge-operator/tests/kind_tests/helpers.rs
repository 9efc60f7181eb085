//! Test helpers for integration tests

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tokio::sync::OnceCell;

use forge_common::crd::{GitRef, GitSource, Param, SourceSpec, Workload, WorkloadSpec};
use forge_common::NAMESPACE_ENABLED_LABEL;
use forge_operator::startup::ensure_crds_installed;

/// Namespace every integration test works in
pub const TEST_NAMESPACE: &str = "forge-integration-test";

static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Connect to the current cluster with the CRD and test namespace in place
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = Client::try_default()
        .await
        .map_err(|e| format!("failed to create client: {e}"))?;

    CRD_INSTALLED
        .get_or_init(|| async {
            ensure_crds_installed(&client)
                .await
                .map_err(|e| e.to_string())?;
            // give the API server a moment to serve the new kind
            tokio::time::sleep(Duration::from_secs(2)).await;
            ensure_namespace(&client).await
        })
        .await
        .clone()?;

    Ok(client)
}

async fn ensure_namespace(client: &Client) -> Result<(), String> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                NAMESPACE_ENABLED_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(format!("failed to create namespace: {e}")),
    }
}

/// A Workload pinned to a revision so no git lookup is needed
pub fn sample_workload(name: &str) -> Workload {
    Workload {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: WorkloadSpec {
            source: Some(SourceSpec {
                git: Some(GitSource {
                    url: "https://github.com/example/petclinic.git".to_string(),
                    ref_: GitRef {
                        branch: Some("main".to_string()),
                        revision: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
                    },
                    path: None,
                }),
            }),
            params: vec![Param {
                name: "deploy".to_string(),
                value: "false".to_string(),
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Delete a Workload, ignoring errors
pub async fn cleanup_workload(client: &Client, name: &str) {
    let api: Api<Workload> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Poll `check` every second until it returns `Some` or `timeout` passes
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    None
}
