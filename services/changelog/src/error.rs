//! Error types for the changelog registry

use std::time::Duration;

use artifact_store::ArtifactError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No project with this name exists
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The project has no changelog with this build number
    #[error("build #{build} not found in project {project}")]
    ChangelogNotFound {
        /// Project name
        project: String,
        /// Requested build number
        build: u64,
    },

    /// Explicit creation of a project which already exists
    #[error("project already exists: {0}")]
    DuplicateProject(String),

    /// The uploaded artifact could not be persisted; the registry is unchanged
    #[error("failed to store artifact: {0}")]
    ArtifactWrite(#[source] ArtifactError),

    /// The registry document exists but could not be parsed
    #[error("registry document {path} is corrupt: {source}")]
    Corrupt {
        /// Location of the document
        path: Utf8PathBuf,
        /// Parse failure
        source: serde_json::Error,
    },

    /// Timed out waiting for another writer to release a lock
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout {
        /// The lock which could not be acquired
        key: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// Project name which cannot be used as a registry key or directory
    #[error("invalid project name: {0:?}")]
    InvalidName(String),

    /// Commit input which could not be understood
    #[error("invalid commit {0:?}: expected \"hash:message\"")]
    InvalidCommit(String),

    /// Upload request which is missing a part or could not be read
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    /// Upload body over the configured limit
    #[error("upload too large: {0}")]
    UploadTooLarge(String),

    /// Serializing the registry document failed
    #[error("serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether the operation may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::LockTimeout { .. } => true,
            RegistryError::ArtifactWrite(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::ProjectNotFound(_) | RegistryError::ChangelogNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            RegistryError::DuplicateProject(_) => StatusCode::CONFLICT,
            RegistryError::InvalidName(_)
            | RegistryError::InvalidCommit(_)
            | RegistryError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            RegistryError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::ArtifactWrite(_)
            | RegistryError::Corrupt { .. }
            | RegistryError::Serialize(_)
            | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::ProjectNotFound(_) => "PROJECT_UNKNOWN",
            RegistryError::ChangelogNotFound { .. } => "BUILD_UNKNOWN",
            RegistryError::DuplicateProject(_) => "PROJECT_EXISTS",
            RegistryError::ArtifactWrite(_) => "ARTIFACT_WRITE",
            RegistryError::Corrupt { .. } => "REGISTRY_CORRUPT",
            RegistryError::LockTimeout { .. } => "LOCK_TIMEOUT",
            RegistryError::InvalidName(_) => "NAME_INVALID",
            RegistryError::InvalidCommit(_) => "COMMIT_INVALID",
            RegistryError::InvalidUpload(_) => "UPLOAD_INVALID",
            RegistryError::UploadTooLarge(_) => "UPLOAD_TOO_LARGE",
            RegistryError::Serialize(_) | RegistryError::Io(_) => "UNKNOWN",
        }
    }
}

/// Error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}
