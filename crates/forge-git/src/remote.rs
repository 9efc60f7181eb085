//! Querying branch heads on a remote repository

use async_trait::async_trait;
use git2::{Cred, CredentialType, Direction, Remote, RemoteCallbacks};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use forge_common::Error;

use crate::credentials::GitCredentials;

/// Trait abstracting the remote ref listing so the resolver can be tested
/// without network access.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteRefs: Send + Sync {
    /// Revision (commit id) at the head of `branch` on the remote
    async fn branch_head(
        &self,
        repository: &str,
        branch: &str,
        credentials: Option<GitCredentials>,
    ) -> Result<String, Error>;
}

/// libgit2-backed remote: the equivalent of `git ls-remote <url> refs/heads/<branch>`
#[derive(Clone, Debug, Default)]
pub struct Git2Remote;

#[async_trait]
impl RemoteRefs for Git2Remote {
    async fn branch_head(
        &self,
        repository: &str,
        branch: &str,
        credentials: Option<GitCredentials>,
    ) -> Result<String, Error> {
        let repo = repository.to_string();
        let branch_name = branch.to_string();

        // libgit2 is blocking. A dropped future leaves the thread to finish on
        // its own; the result is discarded and never reaches the cache.
        tokio::task::spawn_blocking(move || ls_remote_head(&repo, &branch_name, credentials))
            .await
            .map_err(|e| Error::resolution(repository, branch, format!("query task failed: {e}")))?
    }
}

fn ls_remote_head(
    repository: &str,
    branch: &str,
    credentials: Option<GitCredentials>,
) -> Result<String, Error> {
    let to_err = |e: git2::Error| Error::resolution(repository, branch, e.message().to_string());

    let mut callbacks = RemoteCallbacks::new();
    let mut attempted = false;
    callbacks.credentials(move |_url, username_from_url, allowed_types| {
        // libgit2 calls back again after a rejected credential; stop the loop
        if attempted {
            return Err(git2::Error::from_str("authentication rejected by remote"));
        }
        attempted = true;

        match &credentials {
            Some(creds) if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                Cred::userpass_plaintext(&creds.username, &creds.password)
            }
            _ if allowed_types.contains(CredentialType::SSH_KEY) => {
                Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
            }
            _ => Cred::default(),
        }
    });

    let mut remote = Remote::create_detached(repository).map_err(to_err)?;
    let connection = remote
        .connect_auth(Direction::Fetch, Some(callbacks), None)
        .map_err(to_err)?;

    let wanted = format!("refs/heads/{branch}");
    let heads = connection.list().map_err(to_err)?;
    debug!(repository = %repository, refs = heads.len(), "listed remote refs");

    heads
        .iter()
        .find(|head| head.name() == wanted)
        .map(|head| head.oid().to_string())
        .ok_or_else(|| Error::resolution(repository, branch, "branch not found on remote"))
}
