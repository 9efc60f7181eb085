//! Git source resolution for forge
//!
//! Resolves the head revision of a Workload's branch, caching answers for a
//! short TTL so a namespace full of Workloads tracking the same repository
//! does not hammer the git server.

#![deny(missing_docs)]

pub mod credentials;
pub mod remote;
pub mod resolver;
pub mod url;

pub use credentials::GitCredentials;
pub use remote::{Git2Remote, RemoteRefs};
pub use resolver::{parse_ttl, ttl_from_env, RevisionResolver, CACHE_TTL_ENV, DEFAULT_CACHE_TTL};
pub use url::extract_project_name;
