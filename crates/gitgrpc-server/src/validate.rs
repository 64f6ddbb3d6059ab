//! Request validation for `Git.Connect`.
//!
//! The service name from the request metadata is executed directly as a
//! local program, so it is checked by exact match against a fixed
//! allow-list before anything else happens. The repository identifier is
//! passed to that program as its only argument and must stay inside the
//! configured repository root.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tonic::Status;
use tonic::metadata::MetadataMap;

use gitgrpc_core::{MetadataError, StreamMetadata};

/// Backing command for fetch and clone.
pub const UPLOAD_PACK: &str = "git-upload-pack";

/// Backing command for push.
pub const RECEIVE_PACK: &str = "git-receive-pack";

/// Reasons a `Connect` request is refused before anything is spawned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid stream metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("bad service: {0}")]
    ServiceNotPermitted(String),

    #[error("invalid repository {repository:?}: {reason}")]
    RepositoryRejected {
        repository: String,
        reason: &'static str,
    },

    #[error("unknown repository: {0}")]
    RepositoryNotFound(String),
}

impl From<ValidationError> for Status {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RepositoryNotFound(_) => Self::not_found(err.to_string()),
            _ => Self::invalid_argument(err.to_string()),
        }
    }
}

/// The fixed set of commands the server is willing to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAllowList {
    services: BTreeSet<String>,
}

impl ServiceAllowList {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
        }
    }

    /// `git-upload-pack` and `git-receive-pack`.
    pub fn git() -> Self {
        Self::new([UPLOAD_PACK, RECEIVE_PACK])
    }

    /// Exact, case-sensitive membership.
    pub fn permits(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }
}

impl Default for ServiceAllowList {
    fn default() -> Self {
        Self::git()
    }
}

/// Containment rules for repository identifiers.
///
/// Identifiers are relative paths without `..` components and cannot start
/// with `-`. With a root configured they resolve under it and must exist,
/// and symlinks along the way must not lead outside it.
#[derive(Debug, Clone, Default)]
pub struct RepositoryPolicy {
    root: Option<PathBuf>,
}

impl RepositoryPolicy {
    pub const fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Check `repository` and return the path handed to the backing command.
    pub fn resolve(&self, repository: &str) -> Result<PathBuf, ValidationError> {
        let reject = |reason| ValidationError::RepositoryRejected {
            repository: repository.to_string(),
            reason,
        };

        if repository.is_empty() {
            return Err(reject("empty identifier"));
        }
        if repository.starts_with('-') {
            return Err(reject("must not start with '-'"));
        }
        if repository.contains('\0') {
            return Err(reject("contains NUL"));
        }

        let path = Path::new(repository);
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(reject("'..' components are not allowed")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(reject("absolute paths are not allowed"));
                }
            }
        }

        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };
        let resolved = root.join(path);
        let not_found = |_| ValidationError::RepositoryNotFound(repository.to_string());
        let canonical = resolved.canonicalize().map_err(not_found)?;
        let canonical_root = root.canonicalize().map_err(not_found)?;
        if !canonical.starts_with(&canonical_root) {
            return Err(reject("resolves outside the repository root"));
        }
        Ok(resolved)
    }
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Allow-listed service name as requested.
    pub service: String,
    /// Repository identifier as requested.
    pub repository: String,
    /// Program to execute.
    pub program: PathBuf,
    /// Sole argument for `program`.
    pub repository_path: PathBuf,
}

/// Gate between stream establishment and process spawning.
#[derive(Debug, Clone, Default)]
pub struct ServiceValidator {
    allow_list: ServiceAllowList,
    policy: RepositoryPolicy,
    exec_path: Option<PathBuf>,
}

impl ServiceValidator {
    pub const fn new(allow_list: ServiceAllowList, policy: RepositoryPolicy) -> Self {
        Self {
            allow_list,
            policy,
            exec_path: None,
        }
    }

    /// Resolve allow-listed services inside `dir` instead of on `PATH`.
    #[must_use]
    pub fn with_exec_path(mut self, dir: Option<PathBuf>) -> Self {
        self.exec_path = dir;
        self
    }

    pub const fn allow_list(&self) -> &ServiceAllowList {
        &self.allow_list
    }

    /// Validate the metadata of an incoming `Connect` stream.
    pub fn validate(&self, metadata: &MetadataMap) -> Result<ValidatedRequest, ValidationError> {
        let StreamMetadata {
            service,
            repository,
        } = StreamMetadata::extract(metadata)?;

        // The service name is executed as a program; nothing but an exact
        // allow-list hit gets past this point.
        if !self.allow_list.permits(&service) {
            return Err(ValidationError::ServiceNotPermitted(service));
        }

        let repository_path = self.policy.resolve(&repository)?;
        let program = match &self.exec_path {
            Some(dir) => dir.join(&service),
            None => PathBuf::from(&service),
        };

        Ok(ValidatedRequest {
            service,
            repository,
            program,
            repository_path,
        })
    }
}
