//! Stable error taxonomy for repository operations.
//!
//! Library-level (libgit2) failures are translated once, at this boundary,
//! so callers never match on transport- or plumbing-specific error shapes.

use std::path::PathBuf;

use git2::{ErrorClass, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error("git credentials not found or empty")]
    MissingCredentials,
    #[error("invalid git context")]
    InvalidGitContext,
    #[error("project does not exist")]
    ProjectNotFound,
    #[error("branch already exists")]
    BranchExists,
    #[error("reference not found")]
    ReferenceNotFound,
    #[error("resource not found")]
    ResourceNotFound,
    #[error("remote repository is empty")]
    EmptyRemoteRepository,
    #[error("remote not found")]
    RemoteNotFound,
    #[error("non-fast-forward update rejected")]
    NonFastForward,
    #[error("local and remote have diverged, force required")]
    ForceNeeded,
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("authorization failed")]
    AuthorizationFailed,

    #[error("could not create path {}: {source}", .path.display())]
    CouldNotCreatePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not commit changes for project '{project}': {source}")]
    CouldNotCommit {
        project: String,
        #[source]
        source: Box<GitServiceError>,
    },
    #[error("could not get revision for project '{project}': {source}")]
    CouldNotGetRevision {
        project: String,
        #[source]
        source: Box<GitServiceError>,
    },
    #[error("could not get default branch for project '{project}': {source}")]
    CouldNotGetDefaultBranch {
        project: String,
        #[source]
        source: Box<GitServiceError>,
    },
    #[error("could not create branch '{branch}' for project '{project}': {source}")]
    CouldNotCreateBranch {
        branch: String,
        project: String,
        #[source]
        source: Box<GitServiceError>,
    },
    #[error("could not checkout branch '{branch}': {source}")]
    CouldNotCheckout {
        branch: String,
        #[source]
        source: Box<GitServiceError>,
    },
    #[error("could not {action} repository for project '{project}': {source}")]
    GitActionFailed {
        action: &'static str,
        project: String,
        #[source]
        source: Box<GitServiceError>,
    },

    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GitServiceError {
    pub(crate) fn action(action: &'static str, project: &str, source: GitServiceError) -> Self {
        GitServiceError::GitActionFailed {
            action,
            project: project.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn commit(project: &str, source: GitServiceError) -> Self {
        GitServiceError::CouldNotCommit {
            project: project.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn revision(project: &str, source: GitServiceError) -> Self {
        GitServiceError::CouldNotGetRevision {
            project: project.to_string(),
            source: Box::new(source),
        }
    }

    /// Walk the composite wrappers down to the innermost taxonomy kind.
    pub fn root_cause(&self) -> &GitServiceError {
        match self {
            GitServiceError::CouldNotCommit { source, .. }
            | GitServiceError::CouldNotGetRevision { source, .. }
            | GitServiceError::CouldNotGetDefaultBranch { source, .. }
            | GitServiceError::CouldNotCreateBranch { source, .. }
            | GitServiceError::CouldNotCheckout { source, .. }
            | GitServiceError::GitActionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Translate a libgit2 error into the service taxonomy. Failures outside the
/// recognized set pass through unchanged as `GitServiceError::Git`.
pub fn translate(err: git2::Error) -> GitServiceError {
    match classify(&err) {
        Some(kind) => kind,
        None => GitServiceError::Git(err),
    }
}

/// Recognize the libgit2 failure tags the service depends on.
///
/// libgit2 reports an up-to-date push or fetch as plain success, so go-git's
/// `already-up-to-date` non-error has no counterpart here and needs no
/// suppression.
pub(crate) fn classify(err: &git2::Error) -> Option<GitServiceError> {
    let message = err.message();

    if err.code() == ErrorCode::NotFastForward
        || message.contains("non-fast-forward")
        || message.contains("fastforwardable")
    {
        return Some(GitServiceError::NonFastForward);
    }
    if err.class() == ErrorClass::Http && message.contains("403") {
        return Some(GitServiceError::AuthorizationFailed);
    }
    if err.code() == ErrorCode::Auth || message.contains("authentication") {
        return Some(GitServiceError::AuthenticationRequired);
    }
    // Cloning an empty upstream: the remote advertises no refs, so HEAD
    // cannot be resolved to anything checkout-able.
    if message.contains("remote HEAD refers to nonexistent ref")
        || message.contains("no reference found for shorthand 'HEAD'")
    {
        return Some(GitServiceError::EmptyRemoteRepository);
    }
    if err.code() == ErrorCode::NotFound
        && (err.class() == ErrorClass::Config || err.class() == ErrorClass::Net)
        && message.contains("remote")
    {
        return Some(GitServiceError::RemoteNotFound);
    }
    if err.code() == ErrorCode::NotFound && err.class() == ErrorClass::Reference {
        return Some(GitServiceError::ReferenceNotFound);
    }
    None
}
