//! Hosting-provider HTTP API client.
//!
//! Three endpoints are consumed: repository metadata (privacy checks and
//! existence), branch metadata (remote head commit time), and repository
//! creation (provisioning when a configured remote does not exist yet).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Base URL of the hosting provider's REST API.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent sent on every request (the API rejects requests without one).
const USER_AGENT: &str = "cursor-sync/1.0";

/// Default request timeout for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for a newly created repository.
const READY_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("repository not found")]
    NotFound,

    #[error("token is invalid or expired")]
    Unauthorized,

    #[error("insufficient permissions for this operation")]
    Forbidden,

    #[error("repository name is invalid or already exists")]
    InvalidRepository,

    #[error("organization not found or not accessible")]
    OrgNotFound,

    #[error("API returned unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("repository not ready after {0:?}")]
    NotReady(Duration),
}

/// Repository metadata, as returned by `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    pub private: bool,
    pub name: String,
    pub full_name: String,
}

/// Response body for repository creation.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryResponse {
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub html_url: String,
    pub clone_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    gitignore_template: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

/// Thin client over the provider's REST API. The token is optional: the
/// privacy gate can probe anonymously, everything else requires one.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_timeout(token, API_TIMEOUT)
    }

    /// Client with a custom request timeout (the privacy gate uses a
    /// shorter one than general API calls).
    pub fn with_timeout(token: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token,
        }
    }

    /// Point the client at a different API base URL. Used by tests.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("token {}", token));
        }
        builder
    }

    /// Fetch repository metadata. 404 maps to [`GithubError::NotFound`] so
    /// the privacy gate can apply its decision table.
    pub async fn repo_info(&self, owner: &str, repo: &str) -> Result<RepoInfo, GithubError> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, repo);
        let response = self.get(url).send().await?;

        match response.status().as_u16() {
            200 => Ok(response.json::<RepoInfo>().await?),
            404 => Err(GithubError::NotFound),
            401 => Err(GithubError::Unauthorized),
            403 => Err(GithubError::Forbidden),
            status => Err(GithubError::UnexpectedStatus(status)),
        }
    }

    /// Whether the repository exists at the provider.
    pub async fn repository_exists(&self, owner: &str, repo: &str) -> Result<bool, GithubError> {
        match self.repo_info(owner, repo).await {
            Ok(_) => Ok(true),
            Err(GithubError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Author time of the head commit of a branch, from branch metadata.
    /// Available even when the local clone is behind.
    pub async fn branch_head_time(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<DateTime<Utc>, GithubError> {
        let url = format!(
            "{}/repos/{}/{}/branches/{}",
            self.api_base, owner, repo, branch
        );
        let response = self.get(url).send().await?;

        match response.status().as_u16() {
            200 => {
                let body = response.json::<BranchResponse>().await?;
                Ok(body.commit.commit.author.date)
            }
            404 => Err(GithubError::NotFound),
            401 => Err(GithubError::Unauthorized),
            status => Err(GithubError::UnexpectedStatus(status)),
        }
    }

    /// Create a private repository, under the organization when `owner`
    /// names one, otherwise under the authenticated user.
    pub async fn create_repository(
        &self,
        owner: &str,
        name: &str,
        description: &str,
    ) -> Result<RepositoryResponse, GithubError> {
        let url = if !owner.is_empty() && self.is_organization(owner).await {
            format!("{}/orgs/{}/repos", self.api_base, owner)
        } else {
            format!("{}/user/repos", self.api_base)
        };

        let body = CreateRepoRequest {
            name,
            description,
            private: true,
            auto_init: true,
            gitignore_template: None,
        };

        let mut builder = self
            .http
            .post(url)
            .header("Accept", "application/vnd.github.v3+json")
            .json(&body);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("token {}", token));
        }
        let response = builder.send().await?;

        match response.status().as_u16() {
            201 => {
                let repo = response.json::<RepositoryResponse>().await?;
                info!("created private repository {}", repo.full_name);
                Ok(repo)
            }
            401 => Err(GithubError::Unauthorized),
            403 => Err(GithubError::Forbidden),
            404 => Err(GithubError::OrgNotFound),
            422 => Err(GithubError::InvalidRepository),
            status => Err(GithubError::UnexpectedStatus(status)),
        }
    }

    /// Poll until a newly created repository is visible, or the wait budget
    /// runs out. The provider can take a few seconds to initialize one.
    pub async fn wait_for_repository(
        &self,
        owner: &str,
        repo: &str,
        max_wait: Duration,
    ) -> Result<(), GithubError> {
        let start = tokio::time::Instant::now();
        while start.elapsed() < max_wait {
            match self.repository_exists(owner, repo).await {
                Ok(true) => {
                    info!("repository {}/{} is ready", owner, repo);
                    return Ok(());
                }
                Ok(false) => debug!("repository {}/{} not ready yet", owner, repo),
                Err(e) => debug!("repository readiness check failed: {}", e),
            }
            tokio::time::sleep(READY_CHECK_INTERVAL).await;
        }
        Err(GithubError::NotReady(max_wait))
    }

    /// Verify the token by fetching the authenticated user. Returns the
    /// login name.
    pub async fn verify_token(&self) -> Result<String, GithubError> {
        let url = format!("{}/user", self.api_base);
        let response = self.get(url).send().await?;

        match response.status().as_u16() {
            200 => Ok(response.json::<UserResponse>().await?.login),
            401 => Err(GithubError::Unauthorized),
            status => Err(GithubError::UnexpectedStatus(status)),
        }
    }

    async fn is_organization(&self, name: &str) -> bool {
        let url = format!("{}/orgs/{}", self.api_base, name);
        match self.get(url).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_info_deserializes() {
        let json = r#"{"private": true, "name": "settings", "full_name": "me/settings", "id": 1}"#;
        let info: RepoInfo = serde_json::from_str(json).unwrap();
        assert!(info.private);
        assert_eq!(info.full_name, "me/settings");
    }

    #[test]
    fn test_branch_response_extracts_author_date() {
        let json = r#"{
            "name": "main",
            "commit": {
                "sha": "abc",
                "commit": {
                    "author": {"name": "dev", "date": "2026-01-15T10:30:00Z"}
                }
            }
        }"#;
        let body: BranchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            body.commit.commit.author.date,
            "2026-01-15T10:30:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_create_request_serializes_private() {
        let req = CreateRepoRequest {
            name: "settings",
            description: "sync",
            private: true,
            auto_init: true,
            gitignore_template: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["private"], true);
        assert_eq!(json["auto_init"], true);
        assert!(json.get("gitignore_template").is_none());
    }
}
