//! Kubernetes access for the workload controller

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::Value;
#[cfg(test)]
use mockall::automock;

use forge_common::crd::{Pipeline, PipelineRun, Workload};
use forge_common::kube_utils::finalizer_patch;
use forge_common::{Error, ErrorClass, FIELD_MANAGER, WORKLOAD_LABEL};

use crate::pipeline::workload_label_value;

/// Outcome of creating a pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunCreation {
    /// The run was created by this call
    Created,
    /// A run with the same name already existed
    AlreadyExists,
}

/// Trait abstracting Kubernetes client operations for Workloads
///
/// Writes to the Workload carry the resourceVersion that was read, so a
/// concurrent change fails with a conflict and the caller re-reads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadKubeClient: Send + Sync {
    /// Get a Workload, `None` if it does not exist
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Workload>, Error>;

    /// Replace the Workload's finalizer list
    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Apply a JSON merge patch to the Workload's status subresource
    async fn patch_status(&self, namespace: &str, name: &str, patch: Value) -> Result<(), Error>;

    /// Get a pipeline template, `None` if it does not exist
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Option<Pipeline>, Error>;

    /// Get a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a pipeline run; an existing run of the same name is not an error
    async fn create_pipeline_run(&self, run: &PipelineRun) -> Result<RunCreation, Error>;

    /// List the runs labelled as belonging to a Workload
    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Vec<PipelineRun>, Error>;

    /// Delete the runs labelled as belonging to a Workload
    async fn delete_pipeline_runs(&self, namespace: &str, workload: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct WorkloadKubeClientImpl {
    client: Client,
}

impl WorkloadKubeClientImpl {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn run_selector(workload: &str) -> ListParams {
    let value = workload_label_value(workload);
    ListParams::default().labels(&format!("{WORKLOAD_LABEL}={value}"))
}

#[async_trait]
impl WorkloadKubeClient for WorkloadKubeClientImpl {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Workload>, Error> {
        let api: Api<Workload> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<Workload> = Api::namespaced(self.client.clone(), namespace);
        let patch = finalizer_patch(resource_version.as_deref(), &finalizers);
        api.patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, patch: Value) -> Result<(), Error> {
        let api: Api<Workload> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Option<Pipeline>, Error> {
        let api: Api<Pipeline> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_pipeline_run(&self, run: &PipelineRun) -> Result<RunCreation, Error> {
        let namespace = run
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| {
                Error::internal_with_context("workload-client", "run has no namespace")
            })?;
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.create(&params, run).await {
            Ok(_) => Ok(RunCreation::Created),
            Err(e) => {
                let err = Error::from(e);
                if err.class() == ErrorClass::AlreadyExists {
                    Ok(RunCreation::AlreadyExists)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Vec<PipelineRun>, Error> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&run_selector(workload)).await?.items)
    }

    async fn delete_pipeline_runs(&self, namespace: &str, workload: &str) -> Result<(), Error> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        api.delete_collection(&DeleteParams::background(), &run_selector(workload))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_selector_matches_shortened_label() {
        assert_eq!(run_selector("api").label_selector.as_deref(), Some("forge.dev/workload=api"));

        let long = "e".repeat(90);
        let selector = run_selector(&long).label_selector.unwrap();
        let value = selector.trim_start_matches("forge.dev/workload=");
        assert_eq!(value, workload_label_value(&long));
        assert!(value.len() <= 63);
    }
}
