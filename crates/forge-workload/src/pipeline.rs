//! Builders for the pipeline run created for each Workload generation

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::warn;

use forge_common::crd::{
    GitTarget, Pipeline, PipelineRef, PipelineRun, PipelineRunSpec, PodSecurity, PodTemplate,
    RunParam, TaskRunTemplate, Workload, WorkspaceBinding,
};
use forge_common::{Error, GENERATION_LABEL, WORKLOAD_LABEL, WORKLOAD_NAME_ANNOTATION};
use forge_git::extract_project_name;

use crate::client::WorkloadKubeClient;
use crate::config::{
    ANNOTATION_GIT_SECRET, ANNOTATION_WORKSPACE_CLAIM, DEFAULT_GIT_SECRET,
    DEFAULT_WORKSPACE_CLAIM, PIPELINE_SERVICE_ACCOUNT,
};

/// Longest name the API server accepts for a run
const MAX_NAME_LENGTH: usize = 63;

const GIT_CREDENTIALS_WORKSPACE: &str = "git-credentials";
const MAVEN_SETTINGS_WORKSPACE: &str = "maven-settings";
const CLAIM_WORKSPACE_MARKERS: [&str; 4] = ["data", "workspace", "output", "source"];

/// Deterministic run name for a workload generation.
///
/// Workload names too long to fit are cut and tagged with a hash of the
/// full name, so distinct workloads never share a run name. The generation
/// suffix is never cut.
pub fn run_name(workload: &str, generation: i64) -> String {
    let suffix = format!("-run-{generation}");
    let budget = MAX_NAME_LENGTH.saturating_sub(suffix.len());
    format!("{}{suffix}", fit_name(workload, budget))
}

/// Value of [`WORKLOAD_LABEL`] for a workload; names longer than a label
/// value allows are shortened the same way as run names
pub fn workload_label_value(workload: &str) -> String {
    fit_name(workload, MAX_NAME_LENGTH)
}

fn fit_name(name: &str, budget: usize) -> String {
    if name.len() <= budget {
        return name.to_string();
    }
    let hash = format!("{:08x}", fnv1a(name.as_bytes()));
    let keep = budget.saturating_sub(hash.len() + 1);
    let prefix: String = name.chars().take(keep).collect();
    format!("{}-{hash}", prefix.trim_end_matches(['-', '.']))
}

// Stable across processes and releases, unlike std's RandomState
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0x811c_9dc5, |hash, b| (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193))
}

/// Parameters for the run: computed values overlaid by the user's own.
///
/// Output is sorted by name so identical inputs produce identical runs.
pub fn build_params(
    workload: &Workload,
    target: &GitTarget,
    revision: &str,
    image_repo: &str,
) -> Vec<RunParam> {
    let mut params = BTreeMap::from([
        ("ci-git-url".to_string(), target.url.clone()),
        (
            "ci-git-project-name".to_string(),
            extract_project_name(&target.url),
        ),
        ("ci-git-branch".to_string(), target.branch.clone()),
        ("ci-git-revision".to_string(), revision.to_string()),
        ("workloadname".to_string(), workload.name_any()),
        ("image-repo".to_string(), image_repo.to_string()),
    ]);

    for param in &workload.spec.params {
        if param.name.is_empty() {
            continue;
        }
        params.insert(param.name.clone(), param.value.clone());
    }

    params
        .into_iter()
        .map(|(name, value)| RunParam { name, value })
        .collect()
}

/// What backs a declared pipeline workspace
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkspaceSource {
    /// A persistent volume claim
    Claim(String),
    /// A Secret
    Secret(String),
}

/// Decide what should back the workspace `declared` for this workload
pub fn workspace_source(workload: &Workload, declared: &str) -> WorkspaceSource {
    if CLAIM_WORKSPACE_MARKERS
        .iter()
        .any(|marker| declared.contains(marker))
    {
        let claim = workload
            .annotation(ANNOTATION_WORKSPACE_CLAIM)
            .unwrap_or(DEFAULT_WORKSPACE_CLAIM);
        return WorkspaceSource::Claim(claim.to_string());
    }

    match declared {
        GIT_CREDENTIALS_WORKSPACE => WorkspaceSource::Secret(
            workload
                .annotation(ANNOTATION_GIT_SECRET)
                .unwrap_or(DEFAULT_GIT_SECRET)
                .to_string(),
        ),
        MAVEN_SETTINGS_WORKSPACE => WorkspaceSource::Secret(
            workload
                .spec
                .build
                .iter()
                .flat_map(|b| b.service_bindings.iter())
                .find(|b| b.kind == "Secret" && !b.name.is_empty())
                .map(|b| b.name.clone())
                .unwrap_or_else(|| MAVEN_SETTINGS_WORKSPACE.to_string()),
        ),
        other => WorkspaceSource::Secret(other.to_string()),
    }
}

/// Bind each workspace the pipeline declares.
///
/// Secret-backed workspaces whose Secret does not exist are left out; the
/// pipeline decides whether that is fatal when the run starts.
pub async fn bind_workspaces(
    kube: &dyn WorkloadKubeClient,
    workload: &Workload,
    pipeline: &Pipeline,
) -> Result<Vec<WorkspaceBinding>, Error> {
    let namespace = workload.namespace().unwrap_or_default();
    let mut bindings = Vec::with_capacity(pipeline.spec.workspaces.len());

    for declared in &pipeline.spec.workspaces {
        match workspace_source(workload, &declared.name) {
            WorkspaceSource::Claim(claim) => {
                bindings.push(WorkspaceBinding::claim(&declared.name, claim));
            }
            WorkspaceSource::Secret(secret) => {
                if kube.get_secret(&namespace, &secret).await?.is_some() {
                    bindings.push(WorkspaceBinding::secret(&declared.name, secret));
                } else {
                    warn!(
                        workspace = %declared.name,
                        secret = %secret,
                        optional = declared.optional,
                        "secret for workspace not found; leaving it unbound"
                    );
                }
            }
        }
    }

    Ok(bindings)
}

/// Assemble the run object for one generation
pub fn build_pipeline_run(
    workload: &Workload,
    name: &str,
    pipeline_name: &str,
    generation: i64,
    params: Vec<RunParam>,
    workspaces: Vec<WorkspaceBinding>,
) -> Result<PipelineRun, Error> {
    let owner = workload.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("pipeline-run", "workload has no uid to own the run")
    })?;

    let labels = BTreeMap::from([
        (WORKLOAD_LABEL.to_string(), workload_label_value(&workload.name_any())),
        (GENERATION_LABEL.to_string(), generation.to_string()),
    ]);
    let annotations = BTreeMap::from([(WORKLOAD_NAME_ANNOTATION.to_string(), workload.name_any())]);

    let mut run = PipelineRun::new(
        name,
        PipelineRunSpec {
            pipeline_ref: Some(PipelineRef {
                name: pipeline_name.to_string(),
            }),
            params,
            workspaces,
            task_run_template: Some(TaskRunTemplate {
                service_account_name: Some(PIPELINE_SERVICE_ACCOUNT.to_string()),
                pod_template: Some(PodTemplate {
                    security_context: Some(PodSecurity {
                        run_as_user: Some(0),
                        fs_group: Some(0),
                    }),
                }),
            }),
        },
    );
    run.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: workload.namespace(),
        labels: Some(labels),
        annotations: Some(annotations),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    Ok(run)
}
