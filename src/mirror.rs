//! One-directional tree mirroring between the user scope and the working
//! copy, plus bidirectional deletion propagation.
//!
//! The copier is rsync-like: a file is only rewritten when the destination
//! is missing, differs in size, or differs by content hash. Individual file
//! failures are logged and skipped; a sync never aborts on one bad file.

use crate::hash::Hasher;
use crate::paths::PathPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("source directory does not exist: {0}")]
    MissingSource(PathBuf),
}

/// Copy mode for a mirror pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Skip files whose destination matches by size then content hash.
    Rsync,
    /// Copy unconditionally, overwriting the destination.
    Force,
}

/// Counts reported after a copy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    pub skipped: usize,
}

/// Tree mirroring between two scope roots.
///
/// Relative paths are classified by the policy after joining the scope
/// prefix (`User`), so patterns read the same everywhere in the config.
pub struct Mirror {
    policy: Arc<PathPolicy>,
    hasher: Arc<Hasher>,
    scope_prefix: String,
}

impl Mirror {
    pub fn new(policy: Arc<PathPolicy>, hasher: Arc<Hasher>) -> Self {
        Self {
            policy,
            hasher,
            scope_prefix: "User".to_string(),
        }
    }

    /// Copy `src_root` into `dst_root`.
    ///
    /// `prune_excluded_dirs` skips descending into excluded directories and
    /// is set for the user-scope → working-copy direction.
    pub async fn copy_tree(
        &self,
        src_root: &Path,
        dst_root: &Path,
        mode: CopyMode,
        prune_excluded_dirs: bool,
    ) -> Result<CopyStats, MirrorError> {
        if !src_root.is_dir() {
            return Err(MirrorError::MissingSource(src_root.to_path_buf()));
        }

        let mut stats = CopyStats::default();

        let walker = WalkDir::new(src_root).into_iter();
        let entries: Vec<_> = if prune_excluded_dirs {
            walker
                .filter_entry(|e| {
                    if !e.file_type().is_dir() {
                        return true;
                    }
                    match relative_path(src_root, e.path()) {
                        Some(rel) if !rel.is_empty() => {
                            !self.policy.is_excluded(&self.scoped(&rel))
                        }
                        _ => true,
                    }
                })
                .filter_map(|e| e.ok())
                .collect()
        } else {
            walker.filter_map(|e| e.ok()).collect()
        };

        for entry in entries {
            let Some(rel) = relative_path(src_root, entry.path()) else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }

            if self.policy.is_excluded(&self.scoped(&rel)) {
                debug!("skipping excluded path: {}", rel);
                continue;
            }

            let dst = dst_root.join(&rel);

            if entry.file_type().is_dir() {
                if let Err(e) = create_dir_all_mode(&dst) {
                    debug!("failed to create directory {}: {}", dst.display(), e);
                }
                continue;
            }

            // Sockets and other special files cannot be copied.
            if !entry.file_type().is_file() {
                debug!("skipping special file: {}", rel);
                continue;
            }

            let should_copy = match mode {
                CopyMode::Force => true,
                CopyMode::Rsync => self.should_copy(entry.path(), &dst).await,
            };

            if should_copy {
                match copy_file(entry.path(), &dst).await {
                    Ok(()) => {
                        stats.copied += 1;
                        self.hasher.clear_cache(Some(&dst)).await;
                        debug!("copied changed file: {}", rel);
                    }
                    Err(e) => {
                        warn!("failed to copy file {}: {}", rel, e);
                    }
                }
            } else {
                stats.skipped += 1;
                debug!("skipped unchanged file: {}", rel);
            }
        }

        Ok(stats)
    }

    /// Delete files under `walk_root` whose counterpart under
    /// `reference_root` no longer exists. Excluded paths and the marker are
    /// never deleted. Returns the number of files removed.
    pub async fn propagate_deletions(&self, walk_root: &Path, reference_root: &Path) -> usize {
        if !walk_root.is_dir() {
            debug!(
                "{} does not exist, skipping deletion propagation",
                walk_root.display()
            );
            return 0;
        }

        let mut removed = 0;

        for entry in WalkDir::new(walk_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_path(walk_root, entry.path()) else {
                continue;
            };
            if self.policy.is_excluded(&self.scoped(&rel)) {
                continue;
            }

            if !reference_root.join(&rel).exists() {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        removed += 1;
                        self.hasher.clear_cache(Some(entry.path())).await;
                        debug!("removed deleted file: {}", rel);
                    }
                    Err(e) => {
                        warn!("failed to remove deleted file {}: {}", rel, e);
                    }
                }
            }
        }

        if removed > 0 {
            info!("synced deletions: {} files removed", removed);
        }
        removed
    }

    /// Remove files from the working copy that the current exclude patterns
    /// reject. Lets a config change retroactively purge the remote on the
    /// next push.
    pub async fn cleanup_excluded(&self, repo_root: &Path) -> usize {
        let mut to_remove: Vec<PathBuf> = Vec::new();

        let walker = WalkDir::new(repo_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker.filter_map(|e| e.ok()) {
            let Some(rel) = relative_path(repo_root, entry.path()) else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }
            if self.policy.is_excluded(&rel) {
                to_remove.push(entry.path().to_path_buf());
                debug!("marked for removal (excluded): {}", rel);
            }
        }

        let mut removed = 0;
        for path in to_remove {
            // A parent directory removed earlier may have taken this entry
            // with it.
            if !path.exists() {
                continue;
            }
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("failed to remove excluded path {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("cleaned up {} excluded paths from working copy", removed);
        }
        removed
    }

    /// Rsync-mode change detection: size first, then content hashes with
    /// polling. Any hash failure copies conservatively.
    async fn should_copy(&self, src: &Path, dst: &Path) -> bool {
        let Ok(src_meta) = src.metadata() else {
            return true;
        };
        let Ok(dst_meta) = dst.metadata() else {
            debug!("destination missing, copying: {}", dst.display());
            return true;
        };

        if src_meta.len() != dst_meta.len() {
            debug!(
                "size differs, copying: {} ({} vs {})",
                src.display(),
                src_meta.len(),
                dst_meta.len()
            );
            return true;
        }

        let src_hash = match self.hasher.hash_with_polling(src).await {
            Ok(h) => h,
            Err(e) => {
                debug!("source hash unavailable, copying {}: {}", src.display(), e);
                return true;
            }
        };
        let dst_hash = match self.hasher.hash_with_polling(dst).await {
            Ok(h) => h,
            Err(e) => {
                debug!(
                    "destination hash unavailable, copying {}: {}",
                    dst.display(),
                    e
                );
                return true;
            }
        };

        src_hash != dst_hash
    }

    fn scoped(&self, rel: &str) -> String {
        format!("{}/{}", self.scope_prefix, rel)
    }
}

/// Relative path as a forward-slash string, or `None` outside the root.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    Some(s)
}

fn create_dir_all_mode(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}

/// Copy one file, creating intermediate directories (0755) and writing the
/// destination with mode 0644.
async fn copy_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        create_dir_all_mode(parent)?;
    }

    let data = tokio::fs::read(src).await?;
    tokio::fs::write(dst, data).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o644);
        tokio::fs::set_permissions(dst, perms).await?;
    }

    Ok(())
}
