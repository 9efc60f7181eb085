//! Mapping of pipeline run state onto Workload status

use kube::ResourceExt;

use forge_common::crd::{set_condition, Condition, ConditionStatus, PipelineRun, WorkloadStatus};

use crate::config::IMAGE_RESULT_NAME;

/// Condition summarising whether the latest run produced an image
pub const READY: &str = "Ready";

/// Condition reporting whether the git source could be resolved
pub const SOURCE_RESOLVED: &str = "SourceResolved";

/// Condition reporting whether the pipeline template exists
pub const PIPELINE_AVAILABLE: &str = "PipelineAvailable";

/// Whether the current generation already has its run
pub fn is_converged(status: &WorkloadStatus, generation: i64) -> bool {
    status.observed_generation == Some(generation) && status.last_pipeline_run.is_some()
}

/// Record a newly created (or found) run for `generation`.
///
/// Counters move only when the recorded run name changes: the first run
/// counts as a create, every later one as an update.
pub fn record_run(status: &mut WorkloadStatus, run_name: &str, generation: i64) {
    if status.last_pipeline_run.as_deref() != Some(run_name) {
        if status.last_pipeline_run.is_none() {
            status.create_count += 1;
        } else {
            status.update_count += 1;
        }
        status.last_pipeline_run = Some(run_name.to_string());
    }
    status.observed_generation = Some(generation);
}

/// Most recently created run; ties on timestamp are broken by name
pub fn latest_run(runs: &[PipelineRun]) -> Option<&PipelineRun> {
    runs.iter()
        .max_by_key(|run| (run.creation_timestamp().map(|t| t.0), run.name_any()))
}

/// Copy a run's outcome into the status and derive `Ready` from it
pub fn apply_run(status: &mut WorkloadStatus, run: &PipelineRun, generation: i64) {
    let succeeded = run.succeeded();
    status.pipeline_run_status = succeeded.map(|c| c.status.clone());
    status.pipeline_run_reason = succeeded.and_then(|c| c.reason.clone());

    status.last_pipeline_run_start_time = run.status.as_ref().and_then(|s| s.start_time);
    status.last_pipeline_run_completion_time =
        run.status.as_ref().and_then(|s| s.completion_time);
    if let Some(image) = run.result(IMAGE_RESULT_NAME) {
        status.artifact_image = Some(image.to_string());
    }

    let run_name = run.name_any();
    let ready = match succeeded.map(|c| ConditionStatus::from_wire(&c.status)) {
        Some(ConditionStatus::True) => Condition::new(
            READY,
            ConditionStatus::True,
            "Succeeded",
            format!("pipeline run {run_name} succeeded"),
        ),
        Some(ConditionStatus::False) => Condition::new(
            READY,
            ConditionStatus::False,
            succeeded
                .and_then(|c| c.reason.clone())
                .unwrap_or_else(|| "Failed".to_string()),
            succeeded
                .and_then(|c| c.message.clone())
                .unwrap_or_else(|| format!("pipeline run {run_name} failed")),
        ),
        _ => Condition::new(
            READY,
            ConditionStatus::Unknown,
            "Running",
            format!("pipeline run {run_name} is in progress"),
        ),
    };
    set_condition(&mut status.conditions, ready.with_generation(generation));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use forge_common::crd::{
        find_condition, PipelineRunSpec, PipelineRunStatus, RunCondition, RunResult,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn run(name: &str, created_secs: i64) -> PipelineRun {
        let mut run = PipelineRun::new(name, PipelineRunSpec::default());
        run.metadata.creation_timestamp =
            Some(Time(Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap()));
        run
    }

    fn with_outcome(mut run: PipelineRun, status: &str, reason: &str) -> PipelineRun {
        run.status = Some(PipelineRunStatus {
            conditions: vec![RunCondition {
                type_: "Succeeded".to_string(),
                status: status.to_string(),
                reason: Some(reason.to_string()),
                message: Some(format!("{reason} message")),
            }],
            start_time: Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap()),
            completion_time: None,
            results: vec![],
        });
        run
    }

    #[test]
    fn test_convergence_needs_generation_and_run() {
        let mut status = WorkloadStatus::default();
        assert!(!is_converged(&status, 1));
        status.observed_generation = Some(1);
        assert!(!is_converged(&status, 1));
        status.last_pipeline_run = Some("api-run-1".to_string());
        assert!(is_converged(&status, 1));
        assert!(!is_converged(&status, 2));
    }

    #[test]
    fn test_record_run_counts_creates_and_updates() {
        let mut status = WorkloadStatus::default();
        record_run(&mut status, "api-run-1", 1);
        assert_eq!((status.create_count, status.update_count), (1, 0));

        // Same run recorded again (e.g. after AlreadyExists) moves nothing
        record_run(&mut status, "api-run-1", 1);
        assert_eq!((status.create_count, status.update_count), (1, 0));

        record_run(&mut status, "api-run-2", 2);
        assert_eq!((status.create_count, status.update_count), (1, 1));
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.last_pipeline_run.as_deref(), Some("api-run-2"));
    }

    #[test]
    fn test_latest_run_by_creation_then_name() {
        let runs = vec![run("api-run-2", 20), run("api-run-1", 10), run("api-run-3", 20)];
        assert_eq!(latest_run(&runs).unwrap().name_any(), "api-run-3");
        assert!(latest_run(&[]).is_none());
    }

    #[test]
    fn test_succeeded_run_marks_ready_with_image() {
        let mut finished = with_outcome(run("api-run-1", 0), "True", "Succeeded");
        if let Some(status) = finished.status.as_mut() {
            status.completion_time = Some(Utc.timestamp_opt(1_700_000_400, 0).unwrap());
            status.results.push(RunResult {
                name: IMAGE_RESULT_NAME.to_string(),
                value: serde_json::json!("registry.local/team-a/api@sha256:abc"),
            });
        }

        let mut status = WorkloadStatus::default();
        apply_run(&mut status, &finished, 1);

        assert_eq!(status.pipeline_run_status.as_deref(), Some("True"));
        assert_eq!(status.pipeline_run_reason.as_deref(), Some("Succeeded"));
        assert_eq!(
            status.artifact_image.as_deref(),
            Some("registry.local/team-a/api@sha256:abc")
        );
        assert!(status.last_pipeline_run_completion_time.is_some());
        let ready = find_condition(&status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "Succeeded");
        assert_eq!(ready.observed_generation, Some(1));
    }

    #[test]
    fn test_failed_run_carries_its_reason() {
        let failed = with_outcome(run("api-run-1", 0), "False", "PipelineValidationFailed");
        let mut status = WorkloadStatus::default();
        apply_run(&mut status, &failed, 1);

        let ready = find_condition(&status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "PipelineValidationFailed");
        assert_eq!(ready.message, "PipelineValidationFailed message");
    }

    #[test]
    fn test_running_run_is_unknown_and_keeps_previous_image() {
        let mut status = WorkloadStatus {
            artifact_image: Some("registry.local/team-a/api@sha256:old".to_string()),
            ..Default::default()
        };
        apply_run(&mut status, &run("api-run-2", 0), 2);

        assert_eq!(status.pipeline_run_status, None);
        assert_eq!(
            status.artifact_image.as_deref(),
            Some("registry.local/team-a/api@sha256:old")
        );
        let ready = find_condition(&status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason, "Running");
    }

    #[test]
    fn test_repeated_sync_is_stable() {
        let done = with_outcome(run("api-run-1", 0), "True", "Succeeded");
        let mut first = WorkloadStatus::default();
        apply_run(&mut first, &done, 1);
        let mut second = first.clone();
        apply_run(&mut second, &done, 1);
        assert_eq!(first, second);
    }
}
