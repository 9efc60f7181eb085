//! Custom resources forge owns (Workload) and typed views of the foreign
//! resources it manages (Tekton runs and pipelines, Contour proxies).

mod http_proxy;
mod tekton;
mod types;
mod workload;

pub use http_proxy::{HttpProxy, HttpProxySpec, Include, MatchCondition, Route, RouteService};
pub use tekton::{
    ClaimSource, Pipeline, PipelineRef, PipelineRun, PipelineRunSpec, PipelineRunStatus,
    PipelineSpec, PipelineWorkspaceDeclaration, PodSecurity, PodTemplate, RunCondition,
    RunParam, RunResult, SecretSource, TaskRunTemplate, WorkspaceBinding,
};
pub use types::{find_condition, set_condition, Condition, ConditionStatus};
pub use workload::{
    AutoscalingSpec, BuildSpec, GitRef, GitSource, GitTarget, Lifecycle, Param, ResourceSpec,
    ServiceBinding, SourceSpec, Workload, WorkloadSpec, WorkloadStatus,
};
