//! Access-token storage.
//!
//! The hosting-provider token lives in a single file under the application
//! home, created with restrictive permissions. The token value is never
//! logged; use [`mask`] wherever a token might surface in output.

use std::path::PathBuf;
use thiserror::Error;

/// File name of the token under the application home directory.
pub const TOKEN_FILE: &str = ".github";

/// Prefixes identifying the provider's token shapes.
const TOKEN_PREFIXES: [&str; 5] = ["ghp_", "github_pat_", "gho_", "ghu_", "ghs_"];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error(
        "token not found at {0}. Create a personal access token with the 'repo' scope \
         and save it there with mode 0600"
    )]
    TokenMissing(PathBuf),

    #[error("token file {0} is empty")]
    TokenEmpty(PathBuf),

    #[error("token has an unrecognized format; expected a prefix like ghp_ or github_pat_")]
    InvalidFormat,

    #[error("failed to access token file: {0}")]
    Io(#[from] std::io::Error),
}

/// Path of the token file: `~/.cursor-sync/.github`.
pub fn token_path() -> Result<PathBuf, AuthError> {
    let home = dirs::home_dir().ok_or(AuthError::NoHomeDir)?;
    Ok(home.join(crate::config::APP_HOME_DIR).join(TOKEN_FILE))
}

/// Load and validate the stored token.
pub fn load_token() -> Result<String, AuthError> {
    load_token_from(&token_path()?)
}

/// Load a token from an explicit path (used by tests).
pub fn load_token_from(path: &std::path::Path) -> Result<String, AuthError> {
    if !path.exists() {
        return Err(AuthError::TokenMissing(path.to_path_buf()));
    }

    let token = std::fs::read_to_string(path)?.trim().to_string();
    if token.is_empty() {
        return Err(AuthError::TokenEmpty(path.to_path_buf()));
    }
    if !is_valid_token_format(&token) {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

/// Save a token with a 0700 parent directory and 0600 file mode.
pub fn save_token(token: &str) -> Result<(), AuthError> {
    save_token_to(&token_path()?, token)
}

/// Save a token to an explicit path (used by tests).
pub fn save_token_to(path: &std::path::Path, token: &str) -> Result<(), AuthError> {
    if !is_valid_token_format(token) {
        return Err(AuthError::InvalidFormat);
    }

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, token)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Whether a valid token is available.
pub fn has_valid_token() -> bool {
    load_token().is_ok()
}

/// Whether the string carries one of the provider's token prefixes.
pub fn is_valid_token_format(token: &str) -> bool {
    TOKEN_PREFIXES.iter().any(|p| token.starts_with(p))
}

/// Reduce a token to its first 8 characters for safe display.
pub fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_token_format_validation() {
        assert!(is_valid_token_format("ghp_abc123"));
        assert!(is_valid_token_format("github_pat_abc123"));
        assert!(is_valid_token_format("ghs_abc123"));
        assert!(!is_valid_token_format("sk-nope"));
        assert!(!is_valid_token_format(""));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets").join(TOKEN_FILE);

        save_token_to(&path, "ghp_testtoken123").unwrap();
        let loaded = load_token_from(&path).unwrap();
        assert_eq!(loaded, "ghp_testtoken123");
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_token_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets").join(TOKEN_FILE);
        save_token_to(&path, "ghp_testtoken123").unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_save_rejects_bad_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILE);
        assert!(matches!(
            save_token_to(&path, "not-a-token"),
            Err(AuthError::InvalidFormat)
        ));
    }

    #[test]
    fn test_load_missing_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILE);
        assert!(matches!(
            load_token_from(&path),
            Err(AuthError::TokenMissing(_))
        ));
    }

    #[test]
    fn test_load_trims_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILE);
        std::fs::write(&path, "ghp_token\n").unwrap();
        assert_eq!(load_token_from(&path).unwrap(), "ghp_token");
    }

    #[test]
    fn test_mask_shows_only_prefix() {
        assert_eq!(mask("ghp_secretsecretsecret"), "ghp_secr...");
        assert_eq!(mask("abc"), "abc...");
    }
}
