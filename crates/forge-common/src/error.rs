//! Error types for the forge controllers
//!
//! Errors are structured with fields to aid debugging in production.
//! Every error maps onto an [`ErrorClass`], which is what reconcile loops
//! branch on: the class decides whether an operation is retried in place,
//! surfaced as a status condition, or left to the controller's backoff.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classification of a failure, independent of where it came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The referenced object does not exist (HTTP 404)
    NotFound,
    /// A create raced with an existing object of the same name
    AlreadyExists,
    /// The operator is not allowed to perform the call (HTTP 401/403)
    PermissionDenied,
    /// A write carried a stale resource version
    Conflict,
    /// The API server asked us to slow down (HTTP 429)
    RateLimited,
    /// The API server gave up on the request
    ServerTimeout,
    /// A resource this workload depends on is missing
    DependencyNotFound,
    /// The source repository could not be queried
    ExternalResolution,
    /// The object's spec can never be acted on as written
    MalformedSpec,
    /// Anything else
    Unclassified,
}

impl ErrorClass {
    /// Classes that a bounded, in-place retry is expected to clear
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Conflict | Self::RateLimited | Self::ServerTimeout)
    }

    /// Short label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::ServerTimeout => "server_timeout",
            Self::DependencyNotFound => "dependency_not_found",
            Self::ExternalResolution => "external_resolution",
            Self::MalformedSpec => "malformed_spec",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for forge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The workload spec cannot be acted on
    #[error("malformed spec for {workload}: {message}")]
    Validation {
        /// Name of the workload with invalid configuration
        workload: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.source.git.url")
        field: Option<String>,
    },

    /// A resource the workload depends on does not exist
    #[error("{kind} {namespace}/{name} not found")]
    DependencyNotFound {
        /// Kind of the missing resource (e.g., "Pipeline")
        kind: String,
        /// Namespace the resource was looked up in
        namespace: String,
        /// Name of the missing resource
        name: String,
    },

    /// Remote repository query failed
    #[error("failed to resolve {branch} of {repository}: {message}")]
    Resolution {
        /// Repository URL
        repository: String,
        /// Branch being resolved
        branch: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An operation ran past its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was exceeded
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "route-manager")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            workload: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with workload context and field path
    pub fn validation_for_field(
        workload: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            workload: workload.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing-dependency error
    pub fn dependency_not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::DependencyNotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a resolution error for a repository branch
    pub fn resolution(
        repository: impl Into<String>,
        branch: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            repository: repository.into(),
            branch: branch.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Kube { source } => classify_kube(source),
            Error::Validation { .. } => ErrorClass::MalformedSpec,
            Error::DependencyNotFound { .. } => ErrorClass::DependencyNotFound,
            Error::Resolution { .. } => ErrorClass::ExternalResolution,
            Error::Serialization { .. } => ErrorClass::Unclassified,
            Error::Timeout { .. } => ErrorClass::ServerTimeout,
            Error::Internal { .. } => ErrorClass::Unclassified,
        }
    }

    /// Whether a bounded in-place retry is worthwhile
    ///
    /// This is the default predicate for [`crate::retry::RetryPolicy`].
    pub fn is_transient(&self) -> bool {
        self.class().is_transient()
    }

    /// Whether the error means the object is simply absent
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Requeue delay the controllers use for this error's class
    pub fn requeue_after(&self) -> Duration {
        match self.class() {
            ErrorClass::PermissionDenied => Duration::from_secs(300),
            ErrorClass::DependencyNotFound => Duration::from_secs(10),
            ErrorClass::ExternalResolution => Duration::from_secs(30),
            ErrorClass::MalformedSpec => Duration::from_secs(300),
            _ if matches!(self, Error::Timeout { .. }) => Duration::from_secs(30),
            _ => Duration::from_secs(5),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
            kind: None,
        }
    }
}

fn classify_kube(source: &kube::Error) -> ErrorClass {
    let kube::Error::Api(response) = source else {
        return ErrorClass::Unclassified;
    };
    match (response.code, response.reason.as_str()) {
        (404, _) => ErrorClass::NotFound,
        (401 | 403, _) => ErrorClass::PermissionDenied,
        (409, "AlreadyExists") => ErrorClass::AlreadyExists,
        (409, _) => ErrorClass::Conflict,
        (429, _) => ErrorClass::RateLimited,
        (504, _) | (_, "Timeout" | "ServerTimeout") => ErrorClass::ServerTimeout,
        _ => ErrorClass::Unclassified,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use kube::core::ErrorResponse;

    /// Build an API error the way the server reports it
    pub fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }
}
