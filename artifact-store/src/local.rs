use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    artifact_file_name, atomic, check_relative, is_valid_project_name, project_directory,
    ArtifactError, ArtifactErrorKind, ArtifactStore, Reader,
};

/// Artifact store backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArtifacts {
    root: Utf8PathBuf,
}

impl LocalArtifacts {
    /// Create a store rooted at `root`. Nothing is created on disk until the
    /// first artifact is written.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute directory of `project`. Case variants of a name map to the
    /// same directory on case-insensitive filesystems.
    fn project_path(&self, project: &str) -> Result<Utf8PathBuf, ArtifactError> {
        if !is_valid_project_name(project) {
            return Err(ArtifactError::new(
                "resolve",
                ArtifactErrorKind::InvalidPath,
                format!("invalid project name: {project:?}"),
            ));
        }
        Ok(self.root.join(project_directory(project)))
    }
}

#[async_trait::async_trait]
impl ArtifactStore for LocalArtifacts {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    async fn reserve_directory(&self, project: &str) -> Result<Utf8PathBuf, ArtifactError> {
        let dir = self.project_path(project)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| ArtifactError::io("create directory", err).at(dir.as_str()))?;
        Ok(dir)
    }

    #[tracing::instrument(skip(self, reader), fields(root = %self.root))]
    async fn write_artifact(
        &self,
        project: &str,
        build: u64,
        filename: &str,
        reader: &mut Reader<'_>,
    ) -> Result<Utf8PathBuf, ArtifactError> {
        let dir = self.reserve_directory(project).await?;
        let name = artifact_file_name(project, build, filename);
        let target = dir.join(&name);

        let size = atomic::persist_reader(&target, reader)
            .await
            .map_err(|err| ArtifactError::io("write", err).at(target.as_str()))?;

        let relative = Utf8PathBuf::from(format!("{}/{name}", project_directory(project)));
        tracing::debug!(%relative, size, "Stored artifact");
        Ok(relative)
    }

    async fn delete_artifact(&self, relative: &Utf8Path) -> Result<(), ArtifactError> {
        check_relative(relative)?;
        let path = self.root.join(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(%relative, "Deleted artifact");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(%relative, "Artifact already absent");
                Ok(())
            }
            Err(err) => Err(ArtifactError::io("delete", err).at(relative.as_str())),
        }
    }

    async fn delete_project_directory(&self, project: &str) -> Result<(), ArtifactError> {
        let dir = self.project_path(project)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(%dir, "Deleted project directory");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ArtifactError::io("delete directory", err).at(dir.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalArtifacts) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).expect("utf-8 path").to_owned();
        (dir, LocalArtifacts::new(root))
    }

    #[tokio::test]
    async fn write_and_delete_artifact() {
        let (_dir, store) = store();

        let relative = store
            .write_artifact("Foo", 1, "fileA.jar", &mut &b"jar bytes"[..])
            .await
            .unwrap();
        assert_eq!(relative.as_str(), "downloads/Foo/Foo-1.jar");

        let absolute = store.root().join(&relative);
        assert_eq!(std::fs::read(&absolute).unwrap(), b"jar bytes");

        store.delete_artifact(&relative).await.unwrap();
        assert!(!absolute.exists());

        // deleting again is fine
        store.delete_artifact(&relative).await.unwrap();
    }

    #[tokio::test]
    async fn reserve_directory_is_idempotent() {
        let (_dir, store) = store();
        let first = store.reserve_directory("Foo").await.unwrap();
        let second = store.reserve_directory("Foo").await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn delete_project_directory_removes_everything() {
        let (_dir, store) = store();
        store
            .write_artifact("Foo", 1, "a.jar", &mut &b"1"[..])
            .await
            .unwrap();
        store
            .write_artifact("Foo", 2, "a.jar", &mut &b"2"[..])
            .await
            .unwrap();
        store
            .write_artifact("Bar", 1, "b.zip", &mut &b"3"[..])
            .await
            .unwrap();

        store.delete_project_directory("Foo").await.unwrap();

        assert!(!store.root().join("downloads/Foo").exists());
        assert!(store.root().join("downloads/Bar/Bar-1.zip").exists());
        store.delete_project_directory("Foo").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, store) = store();

        let err = store
            .delete_artifact(Utf8Path::new("../outside.jar"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ArtifactErrorKind::InvalidPath);

        let err = store
            .write_artifact("../Foo", 1, "a.jar", &mut &b""[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ArtifactErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn write_failure_reports_error() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.root().join("downloads")).unwrap();
        // A plain file where the project directory should be.
        std::fs::write(store.root().join("downloads/Foo"), b"not a dir").unwrap();

        let err = store
            .write_artifact("Foo", 1, "a.jar", &mut &b"data"[..])
            .await
            .unwrap_err();
        assert_eq!(err.operation(), "create directory");
    }
}
