//! Kubernetes access for namespace cleanup

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use forge_common::kube_utils::build_api_resource;
use forge_common::Error;

/// A resource kind removed from terminating namespaces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupKind {
    /// apiVersion of the kind
    pub api_version: &'static str,
    /// Kind name
    pub kind: &'static str,
}

impl CleanupKind {
    const fn new(api_version: &'static str, kind: &'static str) -> Self {
        Self { api_version, kind }
    }
}

const TEKTON: &str = "tekton.dev/v1";
const TRIGGERS: &str = "triggers.tekton.dev/v1beta1";

/// Kinds deleted from a terminating namespace, in order
pub const CLEANUP_KINDS: [CleanupKind; 7] = [
    CleanupKind::new(TEKTON, "PipelineRun"),
    CleanupKind::new(TEKTON, "TaskRun"),
    CleanupKind::new(TEKTON, "Pipeline"),
    CleanupKind::new(TEKTON, "Task"),
    CleanupKind::new(TRIGGERS, "TriggerTemplate"),
    CleanupKind::new(TRIGGERS, "TriggerBinding"),
    CleanupKind::new(TRIGGERS, "EventListener"),
];

/// Trait abstracting Kubernetes client operations for namespace cleanup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceKubeClient: Send + Sync {
    /// Get a Namespace, `None` if it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// Delete every object of `kind` in `namespace`.
    ///
    /// A kind whose API is not served counts as already empty.
    async fn delete_all_of(&self, namespace: &str, kind: &CleanupKind) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct NamespaceKubeClientImpl {
    client: Client,
}

impl NamespaceKubeClientImpl {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceKubeClient for NamespaceKubeClientImpl {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn delete_all_of(&self, namespace: &str, kind: &CleanupKind) -> Result<(), Error> {
        let ar = build_api_resource(kind.api_version, kind.kind);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        match api
            .delete_collection(&DeleteParams::background(), &ListParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_kinds_resolve_to_served_plurals() {
        let plurals: Vec<String> = CLEANUP_KINDS
            .iter()
            .map(|k| build_api_resource(k.api_version, k.kind).plural)
            .collect();
        assert_eq!(
            plurals,
            vec![
                "pipelineruns",
                "taskruns",
                "pipelines",
                "tasks",
                "triggertemplates",
                "triggerbindings",
                "eventlisteners",
            ]
        );
    }

    #[test]
    fn test_runs_are_deleted_before_definitions() {
        let position = |kind: &str| CLEANUP_KINDS.iter().position(|k| k.kind == kind);
        assert!(position("PipelineRun") < position("Pipeline"));
        assert!(position("TaskRun") < position("Task"));
        assert_eq!(CLEANUP_KINDS[6].api_version, "triggers.tekton.dev/v1beta1");
    }
}
