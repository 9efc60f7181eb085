//! Workload controller settings and the annotations it honours

use std::time::Duration;

/// Annotation naming the secret with git credentials
pub const ANNOTATION_GIT_SECRET: &str = "forge.dev/build-git-secret";

/// Annotation carrying a git access token (takes precedence over the secret)
pub const ANNOTATION_GIT_TOKEN: &str = "forge.dev/build-git-token";

/// Annotation naming the claim bound to data workspaces
pub const ANNOTATION_WORKSPACE_CLAIM: &str = "forge.dev/build-workspace-claim";

/// Annotation naming the event listener service the namespace listener targets
pub const ANNOTATION_LISTENER_SERVICE: &str = "forge.dev/listener-service";

/// Secret used for git credentials when no annotation names one
pub const DEFAULT_GIT_SECRET: &str = "git-credentials";

/// Claim bound to data workspaces when no annotation names one
pub const DEFAULT_WORKSPACE_CLAIM: &str = "shared-data";

/// Event listener service used when no annotation names one
pub const DEFAULT_LISTENER_SERVICE: &str = "el-simple-listener";

/// Pipeline template runs are created from
pub const DEFAULT_PIPELINE_NAME: &str = "master-ci-pipeline";

/// Image repository passed as `image-repo` when the Workload sets none
pub const DEFAULT_IMAGE_REPO: &str = "registry.local/workloads";

/// Service account pipeline pods run as
pub const PIPELINE_SERVICE_ACCOUNT: &str = "pipeline";

/// Pipeline result holding the built image reference
pub const IMAGE_RESULT_NAME: &str = "IMAGE_URL";

/// Process-wide settings for the workload controller
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadConfig {
    /// Pipeline template name
    pub pipeline_name: String,
    /// Default `image-repo` parameter
    pub image_repo: String,
    /// Deadline for a single reconcile invocation
    pub reconcile_timeout: Duration,
    /// Requeue interval for settled Workloads (route drift check)
    pub settled_requeue: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            pipeline_name: DEFAULT_PIPELINE_NAME.to_string(),
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            reconcile_timeout: Duration::from_secs(120),
            settled_requeue: Duration::from_secs(300),
        }
    }
}
