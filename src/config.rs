//! Application configuration.
//!
//! Loaded from `~/.cursor-sync/config.yaml`. Durations are duration strings
//! (`"10s"`, `"5m"`, `"1h30m"`); paths starting with `~` are expanded to the
//! user's home directory. Validation failures at load time are the only
//! fatal errors in the system.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the application home directory under `$HOME`.
pub const APP_HOME_DIR: &str = ".cursor-sync";

/// Minimum allowed debounce interval.
pub const MIN_DEBOUNCE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid duration string {0:?}")]
    InvalidDuration(String),

    #[error("repository URL is required")]
    MissingRepositoryUrl,

    #[error("repository local path is required")]
    MissingLocalPath,

    #[error("cursor config path is required")]
    MissingConfigPath,

    #[error("{name} interval must be positive")]
    NonPositiveInterval { name: &'static str },

    #[error("debounce time must be at least 10 seconds (current: {0:?})")]
    DebounceTooShort(Duration),

    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Conflict resolution policy for diverged push/pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Compare commit author times; the newer side wins.
    Newer,
    /// Local HEAD wins; remote conflicts are discarded.
    Local,
    /// Remote branch wins; local changes are overwritten.
    Remote,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Newer => write!(f, "newer"),
            ConflictStrategy::Local => write!(f, "local"),
            ConflictStrategy::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub repository: RepositorySettings,
    #[serde(default)]
    pub sync: SyncSettings,
    pub cursor: CursorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySettings {
    /// Remote repository URL (HTTPS or SSH shape).
    pub url: String,
    /// Local working-copy path.
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    /// Branch to sync.
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_pull_interval", deserialize_with = "de_duration")]
    pub pull_interval: Duration,
    #[serde(default = "default_push_interval", deserialize_with = "de_duration")]
    pub push_interval: Duration,
    #[serde(default = "default_debounce_time", deserialize_with = "de_duration")]
    pub debounce_time: Duration,
    #[serde(default = "default_true")]
    pub watch_enabled: bool,
    #[serde(default = "default_conflict_resolve")]
    pub conflict_resolve: ConflictStrategy,
    #[serde(
        default = "default_hash_throttle_delay",
        deserialize_with = "de_duration"
    )]
    pub hash_throttle_delay: Duration,
    #[serde(
        default = "default_hash_polling_timeout",
        deserialize_with = "de_duration"
    )]
    pub hash_polling_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            pull_interval: default_pull_interval(),
            push_interval: default_push_interval(),
            debounce_time: default_debounce_time(),
            watch_enabled: true,
            conflict_resolve: default_conflict_resolve(),
            hash_throttle_delay: default_hash_throttle_delay(),
            hash_polling_timeout: default_hash_polling_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorSettings {
    /// Cursor IDE configuration root. The `User/` subdirectory below it is
    /// the sync domain.
    pub config_path: PathBuf,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    // Parsed for config compatibility; rotation beyond daily rolling is
    // handled outside the daemon.
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub max_days: u32,
    #[serde(default)]
    pub compress: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: default_log_dir(),
            max_size: 0,
            max_days: 0,
            compress: false,
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_local_path() -> PathBuf {
    PathBuf::from("~").join(APP_HOME_DIR).join("settings")
}

fn default_pull_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_push_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_debounce_time() -> Duration {
    Duration::from_secs(10)
}

fn default_conflict_resolve() -> ConflictStrategy {
    ConflictStrategy::Newer
}

fn default_hash_throttle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_hash_polling_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("~").join(APP_HOME_DIR).join("logs")
}

impl Config {
    /// Default config file path: `~/.cursor-sync/config.yaml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(APP_HOME_DIR).join("config.yaml"))
    }

    /// Application home directory: `~/.cursor-sync`.
    pub fn app_home() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(APP_HOME_DIR))
    }

    /// Load and validate configuration from the given file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path()?)
    }

    /// Write a commented default configuration if none exists yet.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The user-scope directory: `<config_path>/User`.
    pub fn user_scope_path(&self) -> PathBuf {
        self.cursor.config_path.join("User")
    }

    /// The mirror of the user scope inside the working copy.
    pub fn mirror_scope_path(&self) -> PathBuf {
        self.repository.local_path.join("User")
    }

    fn expand_paths(&mut self) -> Result<(), ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        self.repository.local_path = expand_home(&self.repository.local_path, &home);
        self.cursor.config_path = expand_home(&self.cursor.config_path, &home);
        self.logging.log_dir = expand_home(&self.logging.log_dir, &home);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.url.is_empty() {
            return Err(ConfigError::MissingRepositoryUrl);
        }
        if self.repository.local_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingLocalPath);
        }
        if self.cursor.config_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingConfigPath);
        }
        if self.sync.pull_interval.is_zero() {
            return Err(ConfigError::NonPositiveInterval { name: "pull" });
        }
        if self.sync.push_interval.is_zero() {
            return Err(ConfigError::NonPositiveInterval { name: "push" });
        }
        if self.sync.debounce_time < MIN_DEBOUNCE {
            return Err(ConfigError::DebounceTooShort(self.sync.debounce_time));
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path, home: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix('~') {
        home.join(rest.trim_start_matches('/'))
    } else {
        path.to_path_buf()
    }
}

/// Parse a duration string made of `<number><unit>` segments.
///
/// Supported units: `ms`, `s`, `m`, `h`. Segments concatenate, so
/// `"1h30m"` is ninety minutes.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let value: u64 = number
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;
        let segment = match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(ConfigError::InvalidDuration(input.to_string())),
        };
        total += segment;
    }

    Ok(total)
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cursor-sync configuration
repository:
  # Private repository holding your synced settings. MUST be private.
  url: ""
  local_path: "~/.cursor-sync/settings"
  branch: "main"

sync:
  pull_interval: "5m"
  push_interval: "5m"
  # Minimum quiet period after a change before a realtime sync fires.
  # Must be at least 10s.
  debounce_time: "10s"
  watch_enabled: true
  # One of: newer, local, remote
  conflict_resolve: "newer"
  hash_throttle_delay: "100ms"
  hash_polling_timeout: "10s"

cursor:
  # Cursor configuration root; the User/ subdirectory below it is synced.
  # macOS: ~/Library/Application Support/Cursor
  # Linux: ~/.config/Cursor
  config_path: "~/.config/Cursor"
  exclude_paths:
    - "User/workspaceStorage"
    - "User/globalStorage/state.vscdb"
    - "**/node_modules/"
  include_paths: []

logging:
  level: "info"
  log_dir: "~/.cursor-sync/logs"
  max_size: 10
  max_days: 30
  compress: true
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(debounce: &str) -> String {
        format!(
            r#"
repository:
  url: "https://github.com/me/settings.git"
  local_path: "/tmp/cursor-sync/settings"
cursor:
  config_path: "/tmp/Cursor"
sync:
  debounce_time: "{}"
"#,
            debounce
        )
    }

    #[test]
    fn test_parse_duration_simple() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str(&minimal_yaml("30s")).unwrap();
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.sync.pull_interval, Duration::from_secs(300));
        assert_eq!(config.sync.debounce_time, Duration::from_secs(30));
        assert_eq!(config.sync.conflict_resolve, ConflictStrategy::Newer);
        assert!(config.sync.watch_enabled);
    }

    #[test]
    fn test_debounce_below_minimum_rejected() {
        let config: Config = serde_yaml::from_str(&minimal_yaml("5s")).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DebounceTooShort(_))
        ));
    }

    #[test]
    fn test_missing_url_rejected() {
        let yaml = r#"
repository:
  url: ""
cursor:
  config_path: "/tmp/Cursor"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRepositoryUrl)
        ));
    }

    #[test]
    fn test_conflict_strategy_parses() {
        for (text, expected) in [
            ("newer", ConflictStrategy::Newer),
            ("local", ConflictStrategy::Local),
            ("remote", ConflictStrategy::Remote),
        ] {
            let yaml = format!(
                "{}\n",
                minimal_yaml("10s").replace(
                    "debounce_time: \"10s\"",
                    &format!("debounce_time: \"10s\"\n  conflict_resolve: \"{}\"", text)
                )
            );
            let config: Config = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(config.sync.conflict_resolve, expected);
        }
    }

    #[test]
    fn test_unknown_conflict_strategy_rejected() {
        let yaml = minimal_yaml("10s").replace(
            "debounce_time: \"10s\"",
            "debounce_time: \"10s\"\n  conflict_resolve: \"theirs\"",
        );
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn test_expand_home() {
        let home = Path::new("/home/dev");
        assert_eq!(
            expand_home(Path::new("~/.cursor-sync/settings"), home),
            PathBuf::from("/home/dev/.cursor-sync/settings")
        );
        assert_eq!(
            expand_home(Path::new("/absolute/path"), home),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_default_template_is_valid_yaml() {
        let config: Result<Config, _> = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE);
        assert!(config.is_ok());
    }

    #[test]
    fn test_scope_paths() {
        let config: Config = serde_yaml::from_str(&minimal_yaml("10s")).unwrap();
        assert_eq!(config.user_scope_path(), PathBuf::from("/tmp/Cursor/User"));
        assert_eq!(
            config.mirror_scope_path(),
            PathBuf::from("/tmp/cursor-sync/settings/User")
        );
    }
}
