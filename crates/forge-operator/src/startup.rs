//! CRD installation on startup
//!
//! The operator installs the Workload CRD itself using server-side apply so
//! a new release can roll schema changes forward.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use forge_common::crd::Workload;
use forge_common::FIELD_MANAGER;

/// Name of the Workload CRD object
pub const WORKLOAD_CRD_NAME: &str = "workloads.forge.dev";

/// Render the Workload CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&Workload::crd())
        .map_err(|e| anyhow::anyhow!("failed to serialize Workload CRD: {}", e))
}

/// Ensure the Workload CRD is installed and current
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing {} CRD...", WORKLOAD_CRD_NAME);
    crds.patch(WORKLOAD_CRD_NAME, &params, &Patch::Apply(&Workload::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", WORKLOAD_CRD_NAME, e))?;
    tracing::info!("Workload CRD installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_crd_name_matches_generated_crd() {
        assert_eq!(Workload::crd().name_any(), WORKLOAD_CRD_NAME);
    }

    #[test]
    fn test_crd_yaml_describes_workloads() {
        let yaml = crd_yaml().unwrap();
        let value: serde_json::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["kind"], "CustomResourceDefinition");
        assert_eq!(value["spec"]["group"], "forge.dev");
        assert_eq!(value["spec"]["names"]["kind"], "Workload");
        assert_eq!(value["spec"]["scope"], "Namespaced");
    }
}
