//! Transport error classification.
//!
//! Git failures are classified exactly once, here at the transport
//! boundary. Upper layers branch on [`GitErrorKind`] and never inspect
//! error text themselves.

use thiserror::Error;

/// What a transport failure means for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitErrorKind {
    /// The remote exists but has no commits on the configured branch yet.
    EmptyRemote,
    /// The remote repository does not exist at the provider.
    RepoNotFound,
    /// Push/pull was rejected because the branches diverged.
    Conflict,
    /// Network or authentication failure; retry later.
    NetworkAuth,
    /// Anything else.
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct GitError {
    pub kind: GitErrorKind,
    pub message: String,
}

impl GitError {
    pub fn new(kind: GitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(GitErrorKind::Other, message)
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        let kind = classify(&err);
        Self {
            kind,
            message: err.message().to_string(),
        }
    }
}

/// Map a libgit2 error to a recovery kind, using the structured class/code
/// where available and falling back to message text.
fn classify(err: &git2::Error) -> GitErrorKind {
    let msg = err.message().to_lowercase();

    // Empty remote: the configured branch has no remote ref yet.
    if msg.contains("remote repository is empty")
        || msg.contains("couldn't find remote ref")
        || (err.class() == git2::ErrorClass::Reference && err.code() == git2::ErrorCode::NotFound)
        || (msg.contains("reference") && msg.contains("not found"))
    {
        return GitErrorKind::EmptyRemote;
    }

    if msg.contains("repository not found") || msg.contains("404") {
        return GitErrorKind::RepoNotFound;
    }

    if err.code() == git2::ErrorCode::NotFastForward
        || msg.contains("fast-forward")
        || msg.contains("fastforward")
        || msg.contains("rejected")
        || msg.contains("cannot lock ref")
        || msg.contains("object not found")
    {
        return GitErrorKind::Conflict;
    }

    if err.code() == git2::ErrorCode::Auth
        || err.class() == git2::ErrorClass::Net
        || err.class() == git2::ErrorClass::Ssl
        || err.class() == git2::ErrorClass::Http
        || msg.contains("authentication")
        || msg.contains("network")
        || msg.contains("timeout")
        || msg.contains("401")
        || msg.contains("403")
    {
        return GitErrorKind::NetworkAuth;
    }

    GitErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: git2::ErrorCode, class: git2::ErrorClass, msg: &str) -> git2::Error {
        git2::Error::new(code, class, msg)
    }

    #[test]
    fn test_empty_remote_classification() {
        for msg in [
            "remote repository is empty",
            "couldn't find remote ref refs/heads/main",
            "reference 'refs/remotes/origin/main' not found",
        ] {
            let e = err(git2::ErrorCode::GenericError, git2::ErrorClass::None, msg);
            assert_eq!(
                GitError::from(e).kind,
                GitErrorKind::EmptyRemote,
                "for {:?}",
                msg
            );
        }
    }

    #[test]
    fn test_reference_not_found_code_is_empty_remote() {
        let e = err(
            git2::ErrorCode::NotFound,
            git2::ErrorClass::Reference,
            "no such ref",
        );
        assert_eq!(GitError::from(e).kind, GitErrorKind::EmptyRemote);
    }

    #[test]
    fn test_repo_not_found_classification() {
        for msg in [
            "repository not found",
            "unexpected http status code: 404",
        ] {
            let e = err(git2::ErrorCode::GenericError, git2::ErrorClass::Http, msg);
            assert_eq!(GitError::from(e).kind, GitErrorKind::RepoNotFound);
        }
    }

    #[test]
    fn test_conflict_classification() {
        for msg in [
            "cannot push non-fastforwardable reference",
            "update rejected by remote",
            "cannot lock ref 'refs/heads/main'",
            "object not found - no match for id",
        ] {
            let e = err(git2::ErrorCode::GenericError, git2::ErrorClass::None, msg);
            assert_eq!(
                GitError::from(e).kind,
                GitErrorKind::Conflict,
                "for {:?}",
                msg
            );
        }
        let e = err(
            git2::ErrorCode::NotFastForward,
            git2::ErrorClass::Reference,
            "diverged",
        );
        // NotFastForward code wins even with Reference class.
        assert_eq!(GitError::from(e).kind, GitErrorKind::Conflict);
    }

    #[test]
    fn test_network_auth_classification() {
        for msg in [
            "authentication required",
            "network is unreachable",
            "operation timeout",
        ] {
            let e = err(git2::ErrorCode::GenericError, git2::ErrorClass::None, msg);
            assert_eq!(GitError::from(e).kind, GitErrorKind::NetworkAuth);
        }
        let e = err(git2::ErrorCode::Auth, git2::ErrorClass::Http, "denied");
        assert_eq!(GitError::from(e).kind, GitErrorKind::NetworkAuth);
    }

    #[test]
    fn test_other_classification() {
        let e = err(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::None,
            "something odd happened",
        );
        assert_eq!(GitError::from(e).kind, GitErrorKind::Other);
    }
}
