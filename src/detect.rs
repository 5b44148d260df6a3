//! Cursor installation detection and validation.
//!
//! Run before the daemon starts. A missing or half-created installation is
//! a precondition failure: abort loudly with remediation text rather than
//! syncing an empty tree.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("cursor config path is empty")]
    EmptyPath,

    #[error(
        "cursor configuration directory not found: {0}\n\
         Install Cursor and launch it at least once so the configuration\n\
         directory exists, or point cursor.config_path at the right location"
    )]
    ConfigDirMissing(PathBuf),

    #[error("cursor config path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error(
        "cursor User directory not found: {0}\n\
         Launch Cursor and open Settings once so the User directory and its\n\
         settings files are created"
    )]
    UserDirMissing(PathBuf),

    #[error("failed to access cursor config directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Minimal settings written on a fresh installation so the first sync has
/// content to work with.
const BASIC_SETTINGS: &str = r#"{
    "editor.fontSize": 14,
    "editor.tabSize": 4,
    "workbench.colorTheme": "Default Dark Modern"
}
"#;

/// Validates a Cursor installation rooted at `config_path`.
pub struct Detector {
    config_path: PathBuf,
}

impl Detector {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Full validation: the configured root exists, looks like a Cursor
    /// installation, and has a usable User directory.
    pub fn detect_and_validate(&self) -> Result<(), DetectError> {
        self.validate_config_path()?;
        self.validate_installation()?;
        self.validate_user_directory()?;
        info!(
            "cursor installation detected and validated: {}",
            self.config_path.display()
        );
        Ok(())
    }

    fn validate_config_path(&self) -> Result<(), DetectError> {
        if self.config_path.as_os_str().is_empty() {
            return Err(DetectError::EmptyPath);
        }

        match std::fs::metadata(&self.config_path) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DetectError::NotADirectory(self.config_path.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DetectError::ConfigDirMissing(self.config_path.clone()))
            }
            Err(source) => Err(DetectError::Io {
                path: self.config_path.clone(),
                source,
            }),
        }
    }

    /// Look for directories that indicate a real installation. Only `User`
    /// is required; `extensions` and `logs` are corroborating.
    fn validate_installation(&self) -> Result<(), DetectError> {
        let user_dir = self.config_path.join("User");
        if !user_dir.exists() {
            return Err(DetectError::UserDirMissing(user_dir));
        }

        for optional in ["extensions", "logs"] {
            if self.config_path.join(optional).exists() {
                debug!("found cursor indicator: {}", optional);
            }
        }
        Ok(())
    }

    fn validate_user_directory(&self) -> Result<(), DetectError> {
        let user_dir = self.config_path.join("User");
        let meta = std::fs::metadata(&user_dir).map_err(|source| DetectError::Io {
            path: user_dir.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(DetectError::NotADirectory(user_dir));
        }

        let found = ["settings.json", "keybindings.json"]
            .iter()
            .filter(|f| user_dir.join(f).exists())
            .count();

        if found == 0 {
            info!("no existing settings files found - fresh cursor installation");
            if let Err(e) = self.ensure_basic_settings(&user_dir) {
                warn!("failed to create basic settings: {}", e);
            }
        } else {
            debug!("found {} existing settings files", found);
        }
        Ok(())
    }

    fn ensure_basic_settings(&self, user_dir: &Path) -> std::io::Result<()> {
        let settings = user_dir.join("settings.json");
        if settings.exists() {
            return Ok(());
        }
        std::fs::write(&settings, BASIC_SETTINGS)?;
        info!("created basic settings.json for fresh installation");
        Ok(())
    }
}

/// Default Cursor configuration root for the current OS.
pub fn default_cursor_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    #[cfg(target_os = "macos")]
    {
        Some(home.join("Library/Application Support/Cursor"))
    }
    #[cfg(target_os = "windows")]
    {
        Some(home.join("AppData/Roaming/Cursor"))
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Some(home.join(".config/Cursor"))
    }
}
