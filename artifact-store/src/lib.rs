//! # Artifact store
//!
//! Keeps uploaded build artifacts on disk, one directory per project and one
//! file per build:
//!
//! ```text
//! <root>/downloads/<project>/<project>-<build><ext>
//! ```
//!
//! Paths handed back to callers are relative to `<root>` and always use `/`
//! separators, so they can be stored in the registry document as-is.

use std::{fmt, ops::Deref, sync::Arc};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tokio::io;

pub mod atomic;
mod error;
mod local;

pub use error::{ArtifactError, ArtifactErrorKind};
pub use local::LocalArtifacts;

/// Name of the directory below the root which holds all project directories.
pub const DOWNLOADS_DIR: &str = "downloads";

/// A reader stream for uploaded artifact contents.
pub type Reader<'r> = dyn io::AsyncRead + Unpin + Send + 'r;

/// Storage for build artifacts.
#[async_trait::async_trait]
pub trait ArtifactStore: fmt::Debug + Send + Sync {
    /// The directory that relative artifact paths are resolved against.
    fn root(&self) -> &Utf8Path;

    /// Ensure the directory for `project` exists. Idempotent.
    async fn reserve_directory(&self, project: &str) -> Result<Utf8PathBuf, ArtifactError>;

    /// Persist an uploaded artifact for `project` at `build`, returning its
    /// path relative to the root.
    ///
    /// The file extension is taken from `filename`. The bytes are fully on
    /// disk when this returns `Ok`; on error no file is left at the
    /// destination.
    async fn write_artifact(
        &self,
        project: &str,
        build: u64,
        filename: &str,
        reader: &mut Reader<'_>,
    ) -> Result<Utf8PathBuf, ArtifactError>;

    /// Delete a single artifact by its root-relative path.
    ///
    /// A file which is already missing is not an error.
    async fn delete_artifact(&self, relative: &Utf8Path) -> Result<(), ArtifactError>;

    /// Recursively delete the artifact directory of `project`.
    ///
    /// A directory which is already missing is not an error.
    async fn delete_project_directory(&self, project: &str) -> Result<(), ArtifactError>;
}

/// Whether `name` can be used as a project directory name.
///
/// Rejects empty names, `.` and `..`, and names containing path separators
/// or NUL bytes.
///
/// Names are compared case-sensitively, but the directory and lock file of a
/// name are not distinct from those of its case variants on a
/// case-insensitive filesystem. There, `Foo` and `foo` share
/// `downloads/Foo/`, and removing one deletes the artifacts of both.
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// The extension of an uploaded file name, including the leading dot.
///
/// Only the final path component is considered, so client-side directory
/// names never leak into the stored file name.
pub fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    Utf8Path::new(name).extension().map(|ext| format!(".{ext}"))
}

/// The stored file name for a build: `<project>-<build><ext>`.
pub fn artifact_file_name(project: &str, build: u64, filename: &str) -> String {
    format!(
        "{project}-{build}{}",
        extension(filename).unwrap_or_default()
    )
}

/// The root-relative directory holding a project's artifacts.
pub fn project_directory(project: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{DOWNLOADS_DIR}/{project}"))
}

/// Check that a root-relative path stays inside the root.
pub(crate) fn check_relative(relative: &Utf8Path) -> Result<(), ArtifactError> {
    let contained = !relative.as_str().is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir));

    if contained {
        Ok(())
    } else {
        Err(ArtifactError::new(
            "resolve",
            ArtifactErrorKind::InvalidPath,
            format!("path escapes the artifact root: {relative}"),
        )
        .at(relative.as_str()))
    }
}

#[async_trait::async_trait]
impl<S> ArtifactStore for Arc<S>
where
    S: ?Sized + ArtifactStore,
{
    fn root(&self) -> &Utf8Path {
        self.deref().root()
    }

    async fn reserve_directory(&self, project: &str) -> Result<Utf8PathBuf, ArtifactError> {
        self.deref().reserve_directory(project).await
    }

    async fn write_artifact(
        &self,
        project: &str,
        build: u64,
        filename: &str,
        reader: &mut Reader<'_>,
    ) -> Result<Utf8PathBuf, ArtifactError> {
        self.deref()
            .write_artifact(project, build, filename, reader)
            .await
    }

    async fn delete_artifact(&self, relative: &Utf8Path) -> Result<(), ArtifactError> {
        self.deref().delete_artifact(relative).await
    }

    async fn delete_project_directory(&self, project: &str) -> Result<(), ArtifactError> {
        self.deref().delete_project_directory(project).await
    }
}
