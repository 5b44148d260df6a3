//! Clone recovery: empty-remote bootstrap and repository provisioning.
//!
//! A raw clone can fail two recoverable ways. An empty remote gets a local
//! init with a README commit pushed up. A missing remote gets provisioned
//! through the hosting provider's API, then the clone is retried with
//! exponential backoff (the empty-remote recovery may trigger during any
//! retry, since a freshly provisioned repository may or may not be
//! auto-initialized by the time we reach it).

use super::error::{GitError, GitErrorKind};
use super::{GitTransport, COMMIT_AUTHOR, COMMIT_EMAIL};
use crate::github::GithubClient;
use git2::{Repository, Signature};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum clone attempts after provisioning.
const MAX_CLONE_RETRIES: u32 = 5;
/// Base delay between clone retries.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
/// Cap on the retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
/// How long to wait for a provisioned repository to become visible.
const PROVISION_READY_WAIT: Duration = Duration::from_secs(10);

/// How the working copy came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    /// The remote had content and was cloned.
    Cloned,
    /// The remote was empty; a fresh local repository seeded it.
    BootstrappedEmpty,
}

impl GitTransport {
    /// Initialize a new repository at the working-copy path, commit a
    /// README describing its purpose, and push the branch to the empty
    /// remote.
    pub fn bootstrap_empty(&self) -> Result<(), GitError> {
        info!("remote repository is empty - initializing with first commit");

        let repo = Repository::init(self.local_path())?;
        repo.set_head(&format!("refs/heads/{}", self.branch()))?;

        let readme = format!(
            "# Cursor Settings Sync\n\
             \n\
             This repository contains synchronized Cursor IDE settings.\n\
             \n\
             - **Repository**: {}\n\
             - **Initialized**: {}\n\
             - **Purpose**: Automatic Cursor IDE settings synchronization via cursor-sync\n\
             \n\
             > This repository is managed automatically by cursor-sync.\n\
             > Manual changes may be overwritten during synchronization.\n\
             \n\
             This repository should be **private**: settings can contain\n\
             sensitive configuration.\n",
            self.url(),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
        );
        std::fs::write(self.local_path().join("README.md"), readme)
            .map_err(|e| GitError::other(format!("failed to create README.md: {e}")))?;

        let mut index = repo.index()?;
        index.add_path(Path::new("README.md"))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let sig = Signature::now(COMMIT_AUTHOR, COMMIT_EMAIL)?;
        let commit_id = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            "Initialize cursor-sync settings repository",
            &tree,
            &[],
        )?;
        info!("created initial commit {}", commit_id);

        repo.remote(&self.remote_name, self.url())?;

        info!("pushing initial commit to remote");
        self.push()?;

        info!("empty remote initialized; repository ready for syncing");
        Ok(())
    }
}

/// Clone the remote, recovering from empty and missing repositories.
///
/// `owner`/`repo_name` come from the parsed remote URL and drive the
/// provisioning path.
pub async fn clone_with_recovery(
    transport: &GitTransport,
    github: &GithubClient,
    owner: &str,
    repo_name: &str,
) -> Result<CloneOutcome, GitError> {
    match run_git(transport, GitTransport::clone_repo).await {
        Ok(()) => return Ok(CloneOutcome::Cloned),
        Err(e) => match e.kind {
            GitErrorKind::EmptyRemote => {
                run_git(transport, GitTransport::bootstrap_empty).await?;
                return Ok(CloneOutcome::BootstrappedEmpty);
            }
            GitErrorKind::RepoNotFound => {
                info!("repository not found - attempting to provision it");
            }
            _ => return Err(e),
        },
    }

    provision_repository(github, owner, repo_name).await?;
    retry_clone_with_backoff(transport).await
}

/// Create the repository at the provider unless another process beat us to
/// it, then wait for it to become visible.
async fn provision_repository(
    github: &GithubClient,
    owner: &str,
    repo_name: &str,
) -> Result<(), GitError> {
    match github.repository_exists(owner, repo_name).await {
        Ok(true) => {
            info!("repository already exists, proceeding with clone");
            return Ok(());
        }
        Ok(false) => {}
        Err(e) => warn!("failed to check repository existence: {}", e),
    }

    let description = "Cursor IDE settings sync repository - managed by cursor-sync";
    let created = github
        .create_repository(owner, repo_name, description)
        .await
        .map_err(|e| GitError::other(format!("failed to create repository: {e}")))?;
    info!("created private repository {}", created.html_url);

    if let Err(e) = github
        .wait_for_repository(owner, repo_name, PROVISION_READY_WAIT)
        .await
    {
        warn!("repository not ready after waiting: {}; retrying clone anyway", e);
    }
    Ok(())
}

/// Retry the clone with exponential backoff. The empty-remote recovery can
/// fire from inside a retry.
async fn retry_clone_with_backoff(transport: &GitTransport) -> Result<CloneOutcome, GitError> {
    for attempt in 1..=MAX_CLONE_RETRIES {
        info!(
            "clone attempt {}/{} against provisioned repository",
            attempt, MAX_CLONE_RETRIES
        );

        match run_git(transport, GitTransport::clone_repo).await {
            Ok(()) => {
                info!("repository cloned successfully on attempt {}", attempt);
                return Ok(CloneOutcome::Cloned);
            }
            Err(e) if e.kind == GitErrorKind::EmptyRemote => {
                run_git(transport, GitTransport::bootstrap_empty).await?;
                return Ok(CloneOutcome::BootstrappedEmpty);
            }
            Err(e) => {
                if attempt == MAX_CLONE_RETRIES {
                    return Err(GitError::new(
                        e.kind,
                        format!(
                            "failed to clone repository after {} attempts: {}",
                            MAX_CLONE_RETRIES, e
                        ),
                    ));
                }
                let delay = (RETRY_BASE_DELAY * attempt).min(RETRY_MAX_DELAY);
                info!("repository not ready yet, waiting {:?} before retry", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(GitError::other("clone retry budget exhausted"))
}

/// Run a blocking transport operation off the async runtime.
pub(crate) async fn run_git<T, F>(transport: &GitTransport, f: F) -> Result<T, GitError>
where
    T: Send + 'static,
    F: FnOnce(&GitTransport) -> Result<T, GitError> + Send + 'static,
{
    let t = transport.clone();
    tokio::task::spawn_blocking(move || f(&t))
        .await
        .map_err(|e| GitError::other(format!("git task failed: {e}")))?
}
