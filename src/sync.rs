//! Synchronization between the user scope and the remote repository.
//!
//! `SyncToRemote` mirrors the user scope into the working copy and pushes a
//! commit; `SyncFromRemote` pulls and materializes the working copy back
//! into the user scope. `initialize` runs once at daemon start and decides,
//! based on the first-sync marker, whether this host bootstraps from the
//! remote or seeds it.

use crate::config::Config;
use crate::github::GithubClient;
use crate::hash::Hasher;
use crate::marker::MarkerStore;
use crate::mirror::{CopyMode, Mirror, MirrorError};
use crate::paths::PathPolicy;
use crate::privacy::{parse_remote_url, PrivacyError, PrivacyGate};
use crate::transport::bootstrap::run_git;
use crate::transport::{
    clone_with_recovery, CloneOutcome, ConflictResolver, GitError, GitErrorKind, GitTransport,
    COMMIT_AUTHOR, COMMIT_EMAIL,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Timeout for the privacy gate's metadata probe.
const PRIVACY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("repository privacy check failed: {0}")]
    Privacy(#[from] PrivacyError),

    #[error("git operation failed: {0}")]
    Git(#[from] GitError),

    #[error("mirror operation failed: {0}")]
    Mirror(#[from] MirrorError),

    #[error("failed to write sync marker: {0}")]
    Marker(#[from] std::io::Error),
}

pub struct Syncer {
    config: Arc<Config>,
    transport: GitTransport,
    github: Arc<GithubClient>,
    privacy: PrivacyGate,
    policy: Arc<PathPolicy>,
    mirror: Mirror,
    marker: MarkerStore,
    resolver: ConflictResolver,
    owner: String,
    repo_name: String,
    force_push: AtomicBool,
    force_pull: AtomicBool,
}

impl Syncer {
    /// Build a syncer from loaded configuration and the stored token.
    /// Starts the hash worker pool; call from within the runtime.
    pub fn new(config: Arc<Config>, token: String) -> Result<Self, SyncError> {
        let (owner, repo_name) = parse_remote_url(&config.repository.url)?;

        let transport = GitTransport::new(
            &config.repository.local_path,
            "origin",
            &config.repository.branch,
            &config.repository.url,
            token.clone(),
        );
        let github = Arc::new(GithubClient::new(Some(token.clone())));
        let privacy = PrivacyGate::new(GithubClient::with_timeout(
            Some(token),
            PRIVACY_CHECK_TIMEOUT,
        ));

        let policy = Arc::new(PathPolicy::new(
            config.cursor.exclude_paths.clone(),
            config.cursor.include_paths.clone(),
        ));
        let hasher = Arc::new(Hasher::new(
            config.sync.hash_throttle_delay,
            config.sync.hash_polling_timeout,
        ));
        let mirror = Mirror::new(policy.clone(), hasher);
        let marker = MarkerStore::new(&config.cursor.config_path, &config.repository.url);
        let resolver = ConflictResolver::new(
            transport.clone(),
            github.clone(),
            owner.clone(),
            repo_name.clone(),
        );

        Ok(Self {
            config,
            transport,
            github,
            privacy,
            policy,
            mirror,
            marker,
            resolver,
            owner,
            repo_name,
            force_push: AtomicBool::new(false),
            force_pull: AtomicBool::new(false),
        })
    }

    /// The path policy, shared with the watcher.
    pub fn policy(&self) -> Arc<PathPolicy> {
        self.policy.clone()
    }

    /// Force the next `sync_to_remote` to commit even without detected
    /// changes.
    pub fn force_push(&self) {
        self.force_push.store(true, Ordering::SeqCst);
    }

    /// Force the next `sync_from_remote` cycle.
    pub fn force_pull(&self) {
        self.force_pull.store(true, Ordering::SeqCst);
    }

    /// One-time startup sync. Opens or clones the working copy, then
    /// decides between bootstrap-from-remote and steady state based on the
    /// first-sync marker.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        info!("initializing sync repository");
        self.privacy
            .ensure_private(&self.config.repository.url)
            .await?;

        if self.transport.is_cloned() {
            debug!("working copy exists, opening");
            self.git(GitTransport::open).await?;

            if !self.marker.is_present() {
                info!("no sync marker found - local settings have never been synced");
                info!("overwriting local settings from remote");
                self.bootstrap_from_remote().await?;
                self.marker.write().await?;
            } else {
                debug!("sync marker found - local settings have been synced before");
            }
            return Ok(());
        }

        info!("working copy missing - cloning from remote");
        let outcome =
            clone_with_recovery(&self.transport, &self.github, &self.owner, &self.repo_name)
                .await?;

        match outcome {
            CloneOutcome::BootstrappedEmpty => {
                info!("seeding empty remote from local settings");
                self.sync_to_remote().await?;
                self.marker.write().await?;
            }
            CloneOutcome::Cloned => {
                if !self.marker.is_present() {
                    info!("fresh host against existing remote - overwriting local settings");
                    self.bootstrap_from_remote().await?;
                    self.marker.write().await?;
                } else {
                    debug!("sync marker found after clone");
                }
            }
        }
        Ok(())
    }

    /// Mirror the user scope into the working copy, commit, and push.
    ///
    /// A push conflict triggers one pull + resolve + push retry. The local
    /// commit stands even if the push ultimately fails; the next successful
    /// cycle carries it.
    pub async fn sync_to_remote(&self) -> Result<(), SyncError> {
        info!("syncing local changes to remote");
        self.privacy
            .ensure_private(&self.config.repository.url)
            .await?;

        let user_scope = self.config.user_scope_path();
        let mirror_scope = self.config.mirror_scope_path();

        let deleted = self
            .mirror
            .propagate_deletions(&mirror_scope, &user_scope)
            .await;
        self.mirror
            .cleanup_excluded(&self.config.repository.local_path)
            .await;

        let stats = self
            .mirror
            .copy_tree(&user_scope, &mirror_scope, CopyMode::Rsync, true)
            .await?;
        info!(
            "local sync completed: {} copied, {} skipped, {} deleted",
            stats.copied, stats.skipped, deleted
        );

        let has_changes = self.git(GitTransport::has_changes).await?;
        let force = self.force_push.swap(false, Ordering::SeqCst);
        if !has_changes && !force {
            debug!("no changes to sync to remote");
            if !self.marker.is_present() {
                self.marker.write().await?;
            }
            return Ok(());
        }

        self.git(|t| t.add(".")).await?;

        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string());
        let message = format!(
            "Auto-sync from {} at {}",
            hostname,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.git(move |t| t.commit(&message, COMMIT_AUTHOR, COMMIT_EMAIL))
            .await?;

        let push_success = match self.git(GitTransport::push).await {
            Ok(()) => true,
            Err(e) if e.kind == GitErrorKind::Conflict => {
                warn!("push conflict detected ({}), attempting to resolve", e);
                if let Err(pull_err) = self.git(GitTransport::pull).await {
                    warn!(
                        "pull during conflict resolution failed ({:?}): {}",
                        pull_err.kind, pull_err
                    );
                }
                if let Err(resolve_err) =
                    self.resolver.resolve(self.config.sync.conflict_resolve).await
                {
                    warn!("conflict resolution failed: {}", resolve_err);
                }
                match self.git(GitTransport::push).await {
                    Ok(()) => {
                        info!("push conflict resolved");
                        true
                    }
                    Err(retry_err) => {
                        warn!(
                            "push failed after conflict resolution ({:?}): {}",
                            retry_err.kind, retry_err
                        );
                        false
                    }
                }
            }
            Err(e) => {
                warn!("push failed ({:?}): {}", e.kind, e);
                false
            }
        };

        if !push_success {
            warn!("push failed but local commit stands; the next successful sync will push it");
        }

        if let Err(e) = self.marker.write().await {
            warn!("failed to write sync marker (non-critical): {}", e);
        }
        Ok(())
    }

    /// Pull remote changes and materialize them into the user scope.
    ///
    /// Deletion propagation runs only when the pull succeeded; the copy
    /// runs either way so a flaky remote cannot stall local convergence.
    pub async fn sync_from_remote(&self) -> Result<(), SyncError> {
        info!("syncing remote changes to local");
        self.privacy
            .ensure_private(&self.config.repository.url)
            .await?;
        self.force_pull.store(false, Ordering::SeqCst);

        let pull_success = match self.git(GitTransport::pull).await {
            Ok(()) => true,
            Err(e) => {
                warn!("initial pull failed ({:?}): {}", e.kind, e);
                match self.resolver.resolve(self.config.sync.conflict_resolve).await {
                    Err(resolve_err) => {
                        warn!("conflict resolution failed: {}", resolve_err);
                        false
                    }
                    Ok(()) => match self.git(GitTransport::pull).await {
                        Ok(()) => true,
                        Err(retry_err) => {
                            warn!(
                                "pull failed after conflict resolution ({:?}): {}",
                                retry_err.kind, retry_err
                            );
                            false
                        }
                    },
                }
            }
        };

        let user_scope = self.config.user_scope_path();
        let mirror_scope = self.config.mirror_scope_path();

        let mut deleted = 0;
        if pull_success {
            if mirror_scope.is_dir() {
                deleted = self
                    .mirror
                    .propagate_deletions(&user_scope, &mirror_scope)
                    .await;
            }
        } else {
            warn!("pull failed; skipping deletion propagation, continuing with local copy");
        }

        if mirror_scope.is_dir() {
            let stats = self
                .mirror
                .copy_tree(&mirror_scope, &user_scope, CopyMode::Rsync, false)
                .await?;
            info!(
                "repository sync completed: {} copied, {} skipped, {} deleted",
                stats.copied, stats.skipped, deleted
            );
        } else {
            debug!("mirror scope does not exist in working copy, skipping copy");
        }

        if let Err(e) = self.marker.write().await {
            warn!("failed to write sync marker (non-critical): {}", e);
        }
        Ok(())
    }

    /// Overwrite in-scope local files from the working copy, preserving
    /// local files the remote does not have. Used only before the marker
    /// exists.
    async fn bootstrap_from_remote(&self) -> Result<(), SyncError> {
        let user_scope = self.config.user_scope_path();
        let mirror_scope = self.config.mirror_scope_path();

        if !mirror_scope.is_dir() {
            debug!("remote has no user scope yet, nothing to bootstrap");
            return Ok(());
        }

        let stats = self
            .mirror
            .copy_tree(&mirror_scope, &user_scope, CopyMode::Force, false)
            .await?;
        info!("bootstrap completed: {} files copied from remote", stats.copied);
        Ok(())
    }

    async fn git<T, F>(&self, f: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce(&GitTransport) -> Result<T, GitError> + Send + 'static,
    {
        run_git(&self.transport, f).await
    }
}
