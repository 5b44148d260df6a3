//! Git transport for a single branch of a single remote.
//!
//! All network operations authenticate with the stored token as HTTP basic
//! auth (username literal `token`). Fetches are shallow and branch-scoped.
//! Every operation opens the on-disk repository fresh, so the transport
//! handle itself is cheap to clone and safe to move into blocking tasks.

use chrono::{DateTime, TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod bootstrap;
pub mod error;
pub mod resolve;

pub use bootstrap::{clone_with_recovery, CloneOutcome};
pub use error::{GitError, GitErrorKind};
pub use resolve::ConflictResolver;

/// Commit author used for automated commits.
pub const COMMIT_AUTHOR: &str = "cursor-sync";
/// Commit author email used for automated commits.
pub const COMMIT_EMAIL: &str = "cursor-sync@localhost";

/// Handle on the working copy and its remote.
#[derive(Debug, Clone)]
pub struct GitTransport {
    local_path: PathBuf,
    remote_name: String,
    branch: String,
    url: String,
    token: String,
    depth: i32,
}

impl GitTransport {
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_name: impl Into<String>,
        branch: impl Into<String>,
        url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_name: remote_name.into(),
            branch: branch.into(),
            url: url.into(),
            token: token.into(),
            depth: 1,
        }
    }

    /// Override the fetch depth. `0` fetches full history; the default is a
    /// shallow depth of 1.
    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a working copy exists on disk.
    pub fn is_cloned(&self) -> bool {
        self.local_path.join(".git").exists()
    }

    /// Open the existing working copy; fails if absent.
    pub fn open(&self) -> Result<(), GitError> {
        self.open_repo().map(|_| ())
    }

    pub(crate) fn open_repo(&self) -> Result<Repository, GitError> {
        Ok(Repository::open(&self.local_path)?)
    }

    fn refname(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn remote_refname(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, self.branch)
    }

    /// Token credentials for the remote. The provider expects the literal
    /// username `token` with the token as password.
    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let token = self.token.clone();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username, _allowed| {
            git2::Cred::userpass_plaintext("token", &token)
        });
        callbacks
    }

    /// Shallow, single-branch clone of the configured remote.
    ///
    /// Recovery from empty or missing remotes lives in
    /// [`bootstrap::clone_with_recovery`]; this is the raw attempt.
    pub fn clone_repo(&self) -> Result<(), GitError> {
        info!(
            "cloning {} into {}",
            self.url,
            self.local_path.display()
        );

        if self.local_path.exists() {
            std::fs::remove_dir_all(&self.local_path)
                .map_err(|e| GitError::other(format!("failed to remove existing directory: {e}")))?;
        }
        if let Some(parent) = self.local_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GitError::other(format!("failed to create directory: {e}")))?;
        }

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks());
        if self.depth > 0 {
            fo.depth(self.depth);
        }

        RepoBuilder::new()
            .branch(&self.branch)
            .fetch_options(fo)
            .clone(&self.url, &self.local_path)?;

        info!("repository cloned successfully");
        Ok(())
    }

    /// Shallow pull of the configured branch. Already-up-to-date is a
    /// success; anything that will not fast-forward is a conflict.
    pub fn pull(&self) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        self.fetch_branch(&repo)?;

        let fetched = repo.refname_to_id(&self.remote_refname())?;
        let annotated = repo.find_annotated_commit(fetched)?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            debug!("repository already up to date");
            return Ok(());
        }

        if analysis.is_fast_forward() || analysis.is_unborn() {
            let refname = self.refname();
            repo.reference(&refname, fetched, true, "pull: fast-forward")?;
            repo.set_head(&refname)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))?;
            info!("pulled changes from remote");
            return Ok(());
        }

        Err(GitError::new(
            GitErrorKind::Conflict,
            "pull would not fast-forward; local and remote have diverged",
        ))
    }

    /// Pull with force: the remote branch overwrites local state entirely.
    pub fn force_pull(&self) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        self.fetch_branch(&repo)?;

        let fetched = repo.refname_to_id(&self.remote_refname())?;
        let refname = self.refname();
        repo.reference(&refname, fetched, true, "pull: force reset to remote")?;
        repo.set_head(&refname)?;

        let obj = repo.find_object(fetched, None)?;
        repo.reset(&obj, git2::ResetType::Hard, None)?;

        info!("accepted remote changes (force pull)");
        Ok(())
    }

    fn fetch_branch(&self, repo: &Repository) -> Result<(), GitError> {
        let mut remote = repo.find_remote(&self.remote_name)?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks());
        if self.depth > 0 {
            fo.depth(self.depth);
        }

        let refspec = format!(
            "refs/heads/{0}:refs/remotes/{1}/{0}",
            self.branch, self.remote_name
        );
        remote.fetch(&[refspec.as_str()], Some(&mut fo), None)?;
        Ok(())
    }

    /// Push the current branch to the remote.
    pub fn push(&self) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        let mut remote = repo.find_remote(&self.remote_name)?;

        let mut po = PushOptions::new();
        po.remote_callbacks(self.callbacks());

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        remote.push(&[refspec.as_str()], Some(&mut po))?;

        info!("pushed changes to remote");
        Ok(())
    }

    /// Stage everything matching the pathspec, including deletions.
    pub fn add(&self, pathspec: &str) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        let mut index = repo.index()?;
        index.add_all([pathspec], git2::IndexAddOption::DEFAULT, None)?;
        index.update_all([pathspec], None)?;
        index.write()?;
        Ok(())
    }

    /// Commit the staged state.
    pub fn commit(&self, message: &str, author: &str, email: &str) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now(author, email)?;

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.as_ref().into_iter().collect();

        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!("created commit {}", commit_id);
        Ok(())
    }

    /// Whether the working tree has uncommitted changes (untracked files
    /// included, ignored files not).
    pub fn has_changes(&self) -> Result<bool, GitError> {
        let repo = self.open_repo()?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    /// Author time of the local HEAD commit.
    pub fn last_commit_time(&self) -> Result<DateTime<Utc>, GitError> {
        let repo = self.open_repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        let when = commit.author().when();
        Utc.timestamp_opt(when.seconds(), 0)
            .single()
            .ok_or_else(|| GitError::other("invalid commit timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    fn transport_for(work: &Path, remote: &Path) -> GitTransport {
        // Full history: the local test fixtures don't exercise shallow
        // negotiation.
        GitTransport::new(work, "origin", "main", file_url(remote), "ghp_testtoken")
            .with_depth(0)
    }

    #[test]
    fn test_open_fails_when_absent() {
        let dir = tempdir().unwrap();
        let t = transport_for(&dir.path().join("missing"), dir.path());
        assert!(t.open().is_err());
        assert!(!t.is_cloned());
    }

    #[test]
    fn test_bootstrap_empty_then_commit_push_pull_cycle() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("remote.git");
        Repository::init_bare(&remote_path).unwrap();

        // First host: bootstrap the empty remote.
        let work_a = root.path().join("host-a");
        let a = transport_for(&work_a, &remote_path);
        a.bootstrap_empty().unwrap();
        assert!(a.is_cloned());

        // Exactly one commit: the bootstrap README.
        let repo = Repository::open(&work_a).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 0);
        assert!(work_a.join("README.md").exists());

        // Second host: a plain clone now succeeds.
        let work_b = root.path().join("host-b");
        let b = transport_for(&work_b, &remote_path);
        b.clone_repo().unwrap();
        assert!(work_b.join("README.md").exists());

        // Host A commits a settings file and pushes.
        std::fs::create_dir_all(work_a.join("User")).unwrap();
        std::fs::write(work_a.join("User/settings.json"), r#"{"a":1}"#).unwrap();
        assert!(a.has_changes().unwrap());
        a.add(".").unwrap();
        a.commit("Auto-sync from test at now", COMMIT_AUTHOR, COMMIT_EMAIL)
            .unwrap();
        assert!(!a.has_changes().unwrap());
        a.push().unwrap();

        // Host B pulls and sees it.
        b.pull().unwrap();
        assert_eq!(
            std::fs::read_to_string(work_b.join("User/settings.json")).unwrap(),
            r#"{"a":1}"#
        );

        // Pulling again is already-up-to-date, still a success.
        b.pull().unwrap();
    }

    #[test]
    fn test_clone_empty_remote_classifies_as_empty() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("empty.git");
        Repository::init_bare(&remote_path).unwrap();

        let work = root.path().join("work");
        let t = transport_for(&work, &remote_path);
        let err = t.clone_repo().unwrap_err();
        assert_eq!(err.kind, GitErrorKind::EmptyRemote);
    }

    #[test]
    fn test_last_commit_time_monotonic_after_new_commit() {
        let root = tempdir().unwrap();
        let remote_path = root.path().join("remote.git");
        Repository::init_bare(&remote_path).unwrap();

        let work = root.path().join("work");
        let t = transport_for(&work, &remote_path);
        t.bootstrap_empty().unwrap();

        let first = t.last_commit_time().unwrap();
        std::fs::write(work.join("file.txt"), "x").unwrap();
        t.add(".").unwrap();
        t.commit("next", COMMIT_AUTHOR, COMMIT_EMAIL).unwrap();
        let second = t.last_commit_time().unwrap();
        assert!(second >= first);
    }
}
