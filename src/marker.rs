//! First-sync marker.
//!
//! A sentinel file under the IDE configuration root whose presence means
//! "this host's settings have been part of at least one successful sync".
//! When it is absent at startup, local settings are treated as disposable
//! and the remote is the source of truth. The marker itself is never
//! mirrored (the path policy rejects its suffix) and is never deleted by
//! the system.

use crate::paths::MARKER_SUFFIX;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the marker under the IDE configuration root.
pub const MARKER_FILENAME: &str = MARKER_SUFFIX;

/// Reads and writes the first-sync marker.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
    repo_url: String,
}

impl MarkerStore {
    /// `config_root` is the IDE configuration root; the marker lives
    /// directly inside it.
    pub fn new(config_root: &Path, repo_url: impl Into<String>) -> Self {
        Self {
            path: config_root.join(MARKER_FILENAME),
            repo_url: repo_url.into(),
        }
    }

    /// Presence check by stat.
    pub fn is_present(&self) -> bool {
        self.path.exists()
    }

    /// Create or refresh the marker with a human-readable explanation.
    pub async fn write(&self) -> io::Result<()> {
        let content = format!(
            "cursor-sync marker file\n\
             \n\
             This file indicates that cursor-sync has synchronized these settings.\n\
             Local settings have been synced at least once, so bidirectional sync\n\
             is safe on this host.\n\
             \n\
             Last sync: {}\n\
             Repository: {}\n\
             \n\
             DO NOT DELETE THIS FILE. If deleted, cursor-sync will treat local\n\
             settings as fresh and overwrite them from the remote.\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
            self.repo_url
        );

        tokio::fs::write(&self.path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        debug!("wrote sync marker at {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_marker_absent_then_present() {
        let dir = tempdir().unwrap();
        let marker = MarkerStore::new(dir.path(), "https://github.com/me/settings.git");

        assert!(!marker.is_present());
        marker.write().await.unwrap();
        assert!(marker.is_present());
    }

    #[tokio::test]
    async fn test_marker_content_mentions_repository() {
        let dir = tempdir().unwrap();
        let marker = MarkerStore::new(dir.path(), "https://github.com/me/settings.git");
        marker.write().await.unwrap();

        let content = tokio::fs::read_to_string(marker.path()).await.unwrap();
        assert!(content.contains("https://github.com/me/settings.git"));
        assert!(content.contains("DO NOT DELETE"));
    }

    #[test]
    fn test_marker_filename_is_policy_marker() {
        assert!(crate::paths::PathPolicy::is_marker(MARKER_FILENAME));
    }
}
