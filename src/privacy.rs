//! Repository privacy gate.
//!
//! Settings can carry API keys and workspace paths, so nothing is pushed or
//! pulled until the remote is verifiably private at the hosting provider.
//! The gate fails closed: an indeterminate answer blocks the sync.

use crate::github::{GithubClient, GithubError};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("cannot parse repository owner and name from URL: {0}")]
    UnparseableUrl(String),

    #[error("public repository detected: {0} - sync blocked")]
    PublicRepository(String),

    #[error("cannot verify repository privacy for {url}: {reason}")]
    Indeterminate { url: String, reason: String },
}

/// Extract `(owner, repo)` from the provider's HTTPS and SSH URL shapes,
/// with or without a `.git` suffix.
pub fn parse_remote_url(repo_url: &str) -> Result<(String, String), PrivacyError> {
    let mut url = repo_url.trim().to_string();
    for prefix in ["https://", "http://", "git@"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            url = rest.to_string();
        }
    }
    if let Some(rest) = url.strip_suffix(".git") {
        url = rest.to_string();
    }
    // SSH shape uses a colon between host and path.
    url = url.replacen(':', "/", 1);

    let re = Regex::new(r"github\.com/([^/]+)/([^/\s]+)").expect("valid pattern");
    let caps = re
        .captures(&url)
        .ok_or_else(|| PrivacyError::UnparseableUrl(repo_url.to_string()))?;

    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// Verifies the configured remote is private before network operations.
pub struct PrivacyGate {
    github: GithubClient,
}

impl PrivacyGate {
    pub fn new(github: GithubClient) -> Self {
        Self { github }
    }

    /// Check the remote and return an error unless it is verifiably
    /// private.
    ///
    /// A 404 with a token present is treated as private: the repository is
    /// invisible to the probe but reachable through authenticated Git. An
    /// anonymous 404 and every other non-200 answer block the sync.
    pub async fn ensure_private(&self, repo_url: &str) -> Result<(), PrivacyError> {
        let (owner, repo) = parse_remote_url(repo_url)?;
        debug!("checking repository privacy: {}/{}", owner, repo);

        match self.github.repo_info(&owner, &repo).await {
            Ok(info) if info.private => {
                info!("repository privacy verified: {}", info.full_name);
                Ok(())
            }
            Ok(_) => {
                log_public_banner(repo_url);
                Err(PrivacyError::PublicRepository(repo_url.to_string()))
            }
            Err(GithubError::NotFound) if self.github.has_token() => {
                debug!("repository returned 404 with token present, assuming private");
                Ok(())
            }
            Err(e) => {
                log_indeterminate_banner(repo_url, &e);
                Err(PrivacyError::Indeterminate {
                    url: repo_url.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn log_public_banner(repo_url: &str) {
    error!("{}", "=".repeat(72));
    error!("SECURITY WARNING: PUBLIC REPOSITORY DETECTED");
    error!("repository: {}", repo_url);
    error!("sync blocked: settings may contain API keys, tokens, and workspace paths");
    error!("switch the repository to private at the hosting provider to resume");
    error!("{}", "=".repeat(72));
}

fn log_indeterminate_banner(repo_url: &str, reason: &GithubError) {
    error!("{}", "=".repeat(72));
    error!("WARNING: CANNOT VERIFY REPOSITORY PRIVACY");
    error!("repository: {}", repo_url);
    error!("reason: {}", reason);
    error!("sync blocked: only verified private repositories are synced");
    error!("{}", "=".repeat(72));
}
