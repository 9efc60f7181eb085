//! Workload Custom Resource Definition
//!
//! A Workload names a git source and build parameters. The workload
//! controller turns every new generation of the spec into exactly one
//! pipeline run and mirrors that run's progress back into the status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::Error;

/// Workload specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "Workload",
    plural = "workloads",
    shortname = "wl",
    namespaced,
    status = "WorkloadStatus",
    printcolumn = r#"{"name":"Pipeline","type":"string","jsonPath":".status.lastPipelineRun"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.artifactImage"}"#,
    printcolumn = r#"{"name":"Created","type":"integer","jsonPath":".status.createCount"}"#,
    printcolumn = r#"{"name":"Updated","type":"integer","jsonPath":".status.updateCount"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Where the code to build lives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,

    /// Explicit pipeline parameters; these win over computed defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    /// Build-time settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,

    /// Runtime environment entries (`KEY=value`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Resource limits and requests for the built workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Horizontal autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingSpec>,
}

/// Source location
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Git repository source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
}

/// A git repository and the ref to build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Clone URL (https or ssh)
    #[serde(default)]
    pub url: String,

    /// Branch or pinned revision
    #[serde(default, rename = "ref")]
    pub ref_: GitRef,

    /// Sub-directory within the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Git ref selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    /// Branch whose head is built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Pinned commit; when set the branch head is not looked up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Name/value pipeline parameter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Parameter value
    #[serde(default)]
    pub value: String,
}

/// Build-time settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Build environment entries (`KEY=value`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Objects bound into the build (e.g. a maven settings secret)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_bindings: Vec<ServiceBinding>,
}

/// Reference to an object bound into the build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ServiceBinding {
    /// Kind of the bound object (e.g. "Secret")
    pub kind: String,
    /// Name of the bound object
    pub name: String,
}

/// Resource limits and requests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceSpec {
    /// Upper bounds (e.g. `cpu: 500m`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    /// Scheduling requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Autoscaling bounds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSpec {
    /// Whether autoscaling is on
    #[serde(default)]
    pub enabled: bool,
    /// Lower replica bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    /// Upper replica bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    /// Target average CPU utilisation
    #[serde(
        default,
        rename = "targetCPUUtilizationPercentage",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_cpu_utilization_percentage: Option<i32>,
    /// Target average memory utilisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_memory_utilization_percentage: Option<i32>,
}

/// Observed state of a Workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Generation for which a run was last created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Name of the run created for `observedGeneration`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pipeline_run: Option<String>,

    /// Status of the run's `Succeeded` condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_status: Option<String>,

    /// Reason of the run's `Succeeded` condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_reason: Option<String>,

    /// When the most recent run started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pipeline_run_start_time: Option<DateTime<Utc>>,

    /// When the most recent run finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pipeline_run_completion_time: Option<DateTime<Utc>>,

    /// Image reference produced by the most recent run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_image: Option<String>,

    /// Number of runs created for a workload with no prior run
    #[serde(default)]
    pub create_count: i64,

    /// Number of runs created to replace an earlier one
    #[serde(default)]
    pub update_count: i64,

    /// Ready, SourceResolved and PipelineAvailable conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Where a Workload is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Live, but the cleanup finalizer has not been added yet
    NeedsFinalizer,
    /// Live and guarded by the finalizer
    Active,
    /// Being deleted and still holding the finalizer
    Finalizing,
    /// Being deleted and the finalizer is already gone
    Released,
}

/// The resolved build target of a valid spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitTarget {
    /// Repository URL
    pub url: String,
    /// Branch to build (may be empty when only a revision is pinned)
    pub branch: String,
    /// Pinned revision, if any
    pub revision: Option<String>,
}

impl Workload {
    /// Derive the lifecycle state from deletion timestamp and finalizers
    pub fn lifecycle(&self, finalizer: &str) -> Lifecycle {
        let has_finalizer = self.finalizers().iter().any(|f| f == finalizer);
        match (self.metadata.deletion_timestamp.is_some(), has_finalizer) {
            (false, false) => Lifecycle::NeedsFinalizer,
            (false, true) => Lifecycle::Active,
            (true, true) => Lifecycle::Finalizing,
            (true, false) => Lifecycle::Released,
        }
    }

    /// Look up a non-empty annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations()
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Validate the source section and return what to build.
    ///
    /// A missing git source, an empty URL, or a ref with neither branch nor
    /// revision can never produce a run, so they are reported as malformed.
    pub fn git_target(&self) -> Result<GitTarget, Error> {
        let name = self.name_any();
        let git = self
            .spec
            .source
            .as_ref()
            .and_then(|s| s.git.as_ref())
            .ok_or_else(|| {
                Error::validation_for_field(&name, "spec.source.git", "git source is required")
            })?;

        let url = git.url.trim();
        if url.is_empty() {
            return Err(Error::validation_for_field(
                &name,
                "spec.source.git.url",
                "repository url is empty",
            ));
        }

        let branch = non_empty(git.ref_.branch.as_deref());
        let revision = non_empty(git.ref_.revision.as_deref());
        if branch.is_none() && revision.is_none() {
            return Err(Error::validation_for_field(
                &name,
                "spec.source.git.ref",
                "either branch or revision must be set",
            ));
        }

        Ok(GitTarget {
            url: url.to_string(),
            branch: branch.unwrap_or_default().to_string(),
            revision: revision.map(str::to_string),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
