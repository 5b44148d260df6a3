//! Conflict resolution for diverged push/pull.
//!
//! Three policies. `local` keeps the local HEAD and discards any partially
//! merged state. `remote` force-pulls so the remote branch overwrites
//! local. `newer` compares the local HEAD author time against the remote
//! branch head time from the provider's branch metadata (available even
//! when local is behind) and dispatches to one of the other two. The
//! resolver is idempotent; re-invoking it on continued failure is safe.

use super::bootstrap::run_git;
use super::error::GitError;
use super::GitTransport;
use crate::config::ConflictStrategy;
use crate::github::GithubClient;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ConflictResolver {
    transport: GitTransport,
    github: Arc<GithubClient>,
    owner: String,
    repo: String,
}

impl ConflictResolver {
    pub fn new(
        transport: GitTransport,
        github: Arc<GithubClient>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            github,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Resolve the current conflicted state according to the policy.
    pub async fn resolve(&self, strategy: ConflictStrategy) -> Result<(), GitError> {
        info!("resolving conflicts using strategy: {}", strategy);
        match strategy {
            ConflictStrategy::Local => self.resolve_local().await,
            ConflictStrategy::Remote => self.resolve_remote().await,
            ConflictStrategy::Newer => self.resolve_newer().await,
        }
    }

    async fn resolve_local(&self) -> Result<(), GitError> {
        info!("keeping local changes");
        run_git(&self.transport, GitTransport::reset_to_local_head).await
    }

    async fn resolve_remote(&self) -> Result<(), GitError> {
        info!("accepting remote changes");
        run_git(&self.transport, GitTransport::force_pull).await
    }

    async fn resolve_newer(&self) -> Result<(), GitError> {
        let local_time = match run_git(&self.transport, GitTransport::last_commit_time).await {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to get local commit time, using remote strategy: {}", e);
                return self.resolve_remote().await;
            }
        };

        let remote_time = match self
            .github
            .branch_head_time(&self.owner, &self.repo, self.transport.branch())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to get remote commit time, using local strategy: {}", e);
                return self.resolve_local().await;
            }
        };

        if local_time > remote_time {
            info!("local changes are newer, keeping local version");
            self.resolve_local().await
        } else {
            info!("remote changes are newer, keeping remote version");
            self.resolve_remote().await
        }
    }
}

impl GitTransport {
    /// Hard-reset the working tree to local HEAD and drop conflicted
    /// entries from the index, discarding any partially merged state.
    pub(crate) fn reset_to_local_head(&self) -> Result<(), GitError> {
        let repo = self.open_repo()?;

        let head = repo.revparse_single("HEAD")?;
        repo.reset(&head, git2::ResetType::Hard, None)?;

        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        let mut index = repo.index()?;
        for entry in statuses.iter() {
            if entry.status().contains(git2::Status::CONFLICTED) {
                if let Some(path) = entry.path() {
                    let _ = index.remove_path(Path::new(path));
                }
            }
        }
        index.write()?;

        let _ = repo.cleanup_state();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use tempfile::tempdir;

    fn transport_for(work: &Path, remote: &Path) -> GitTransport {
        GitTransport::new(
            work,
            "origin",
            "main",
            format!("file://{}", remote.display()),
            "ghp_testtoken",
        )
        .with_depth(0)
    }

    #[tokio::test]
    async fn test_local_strategy_discards_dirty_state() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("remote.git");
        Repository::init_bare(&remote_path).unwrap();

        let work = root.path().join("work");
        let t = transport_for(&work, &remote_path);
        t.bootstrap_empty().unwrap();

        // Commit a file, then dirty the working tree.
        std::fs::write(work.join("settings.json"), r#"{"a":1}"#).unwrap();
        t.add(".").unwrap();
        t.commit("add settings", "cursor-sync", "cursor-sync@localhost")
            .unwrap();
        std::fs::write(work.join("settings.json"), "garbage").unwrap();

        let github = Arc::new(GithubClient::new(None).with_api_base("http://127.0.0.1:1"));
        let resolver = ConflictResolver::new(t.clone(), github, "me", "settings");
        resolver.resolve(ConflictStrategy::Local).await.unwrap();

        // Working tree is back at HEAD.
        assert_eq!(
            std::fs::read_to_string(work.join("settings.json")).unwrap(),
            r#"{"a":1}"#
        );
        assert!(!t.has_changes().unwrap());
    }

    #[tokio::test]
    async fn test_remote_strategy_overwrites_local_divergence() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("remote.git");
        Repository::init_bare(&remote_path).unwrap();

        // Host A seeds the remote and pushes a settings file.
        let work_a = root.path().join("host-a");
        let a = transport_for(&work_a, &remote_path);
        a.bootstrap_empty().unwrap();
        std::fs::write(work_a.join("settings.json"), r#"{"from":"a"}"#).unwrap();
        a.add(".").unwrap();
        a.commit("a settings", "cursor-sync", "cursor-sync@localhost")
            .unwrap();
        a.push().unwrap();

        // Host B clones, then both sides diverge.
        let work_b = root.path().join("host-b");
        let b = transport_for(&work_b, &remote_path);
        b.clone_repo().unwrap();

        std::fs::write(work_b.join("settings.json"), r#"{"from":"b"}"#).unwrap();
        b.add(".").unwrap();
        b.commit("b settings", "cursor-sync", "cursor-sync@localhost")
            .unwrap();

        std::fs::write(work_a.join("settings.json"), r#"{"from":"a2"}"#).unwrap();
        a.add(".").unwrap();
        a.commit("a2 settings", "cursor-sync", "cursor-sync@localhost")
            .unwrap();
        a.push().unwrap();

        // B's push now conflicts; remote strategy takes A's content.
        assert!(b.push().is_err());
        let github = Arc::new(GithubClient::new(None).with_api_base("http://127.0.0.1:1"));
        let resolver = ConflictResolver::new(b.clone(), github, "me", "settings");
        resolver.resolve(ConflictStrategy::Remote).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(work_b.join("settings.json")).unwrap(),
            r#"{"from":"a2"}"#
        );
        // Push after resolution succeeds (nothing new to reject).
        b.push().unwrap();
    }

    #[tokio::test]
    async fn test_newer_falls_back_to_local_when_remote_time_unavailable() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("remote.git");
        Repository::init_bare(&remote_path).unwrap();

        let work = root.path().join("work");
        let t = transport_for(&work, &remote_path);
        t.bootstrap_empty().unwrap();
        std::fs::write(work.join("settings.json"), r#"{"a":1}"#).unwrap();
        t.add(".").unwrap();
        t.commit("settings", "cursor-sync", "cursor-sync@localhost")
            .unwrap();

        // The API client points at a dead endpoint, so the remote time is
        // unavailable and the local strategy runs.
        let github = Arc::new(GithubClient::new(None).with_api_base("http://127.0.0.1:1"));
        let resolver = ConflictResolver::new(t.clone(), github, "me", "settings");

        std::fs::write(work.join("settings.json"), "dirty").unwrap();
        resolver.resolve(ConflictStrategy::Newer).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(work.join("settings.json")).unwrap(),
            r#"{"a":1}"#
        );
    }
}
