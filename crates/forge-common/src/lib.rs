//! Common types for forge: CRDs, errors, retry, and observability

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ErrorClass};

/// API group of the forge CRDs
pub const FORGE_GROUP: &str = "forge.dev";

/// Finalizer guarding Workload deletion until routes and runs are cleaned up
pub const WORKLOAD_FINALIZER: &str = "forge.dev/workload-cleanup";

/// Label tying a pipeline run to the Workload that created it
pub const WORKLOAD_LABEL: &str = "forge.dev/workload";

/// Annotation carrying the full Workload name on its runs; the label value
/// is shortened for names longer than a label allows
pub const WORKLOAD_NAME_ANNOTATION: &str = "forge.dev/workload-name";

/// Label recording the Workload generation a run was created for
pub const GENERATION_LABEL: &str = "forge.dev/generation";

/// Namespace label that opts a namespace into cascade cleanup
pub const NAMESPACE_ENABLED_LABEL: &str = "forge.dev/enabled";

/// Field manager used for every write forge makes
pub const FIELD_MANAGER: &str = "forge-controller";
