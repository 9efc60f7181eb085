//! Branch head resolution with a process-wide TTL cache
//!
//! Every Workload that builds from a branch needs the branch's current head
//! on each reconcile. Remote queries are slow and rate limited, so results
//! are cached per `(repository, branch)` for a short TTL. Only successful
//! lookups are cached; a failure is returned to the caller and the next
//! call queries the remote again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, instrument};

use forge_common::metrics::record_revision_lookup;
use forge_common::Error;

use crate::credentials::GitCredentials;
use crate::remote::{Git2Remote, RemoteRefs};

/// Environment variable overriding the cache TTL in seconds
pub const CACHE_TTL_ENV: &str = "GIT_SHA_CACHE_TTL_SECONDS";

/// TTL used when the environment does not set a valid one
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Parse a TTL override; anything but a positive integer yields the default
pub fn parse_ttl(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CACHE_TTL)
}

/// TTL from [`CACHE_TTL_ENV`], falling back to [`DEFAULT_CACHE_TTL`]
pub fn ttl_from_env() -> Duration {
    parse_ttl(std::env::var(CACHE_TTL_ENV).ok().as_deref())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    repository: String,
    branch: String,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    revision: String,
    fetched_at: Instant,
}

/// Resolves branch heads, caching results for a fixed TTL
pub struct RevisionResolver {
    remote: Arc<dyn RemoteRefs>,
    ttl: Duration,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    // One gate per key so concurrent misses share a single remote query
    inflight: Gates,
}

impl RevisionResolver {
    /// Create a resolver over the given remote
    pub fn new(remote: Arc<dyn RemoteRefs>, ttl: Duration) -> Self {
        Self {
            remote,
            ttl,
            cache: RwLock::new(HashMap::new()),
            inflight: DashMap::new(),
        }
    }

    /// libgit2-backed resolver with the TTL taken from the environment
    pub fn from_env() -> Self {
        Self::new(Arc::new(Git2Remote), ttl_from_env())
    }

    /// Current head revision of `branch` in `repository`.
    ///
    /// A cached entry younger than the TTL is returned without contacting
    /// the remote. Credentials are only used for the remote query and are
    /// not part of the cache key.
    #[instrument(skip(self, credentials), fields(repository = %repository, branch = %branch))]
    pub async fn resolve(
        &self,
        repository: &str,
        branch: &str,
        credentials: Option<GitCredentials>,
    ) -> Result<String, Error> {
        let key = CacheKey {
            repository: repository.to_string(),
            branch: branch.to_string(),
        };

        if let Some(revision) = self.fresh(&key).await {
            record_revision_lookup(true);
            return Ok(revision);
        }

        let mut lease = GateLease {
            inflight: &self.inflight,
            key: key.clone(),
            guard: None,
        };
        let gate = self.inflight.entry(key.clone()).or_default().clone();
        lease.guard = Some(gate.lock_owned().await);

        // Another caller may have filled the entry while we waited
        if let Some(revision) = self.fresh(&key).await {
            record_revision_lookup(true);
            return Ok(revision);
        }
        record_revision_lookup(false);

        let revision = self
            .remote
            .branch_head(repository, branch, credentials)
            .await?;
        debug!(revision = %revision, "resolved branch head");

        self.cache.write().await.insert(
            key,
            CacheEntry {
                revision: revision.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(revision)
    }

    async fn fresh(&self, key: &CacheKey) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.revision.clone())
    }
}

type Gates = DashMap<CacheKey, Arc<Mutex<()>>>;

/// Holds a key's gate; on drop, the gate is removed once nobody else is
/// waiting on it
struct GateLease<'a> {
    inflight: &'a Gates,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inflight.remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

impl std::fmt::Debug for RevisionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionResolver")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
