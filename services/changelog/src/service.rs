//! The registry service: every mutation of projects, changelogs and their
//! artifacts goes through here.

use std::fmt;
use std::sync::Arc;

use artifact_store::{ArtifactError, ArtifactStore, is_valid_project_name};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncRead;

use crate::allocator::next_build_number;
use crate::commit::{self, CommitInput};
use crate::error::{RegistryError, RegistryResult};
use crate::lock::{LockGuard, LockManager};
use crate::model::{Changelog, Project, Registry, Timestamp};
use crate::store::RegistryStore;

/// A file or directory which could not be removed while the registry entry
/// referring to it was. The registry change still went through.
#[derive(Debug)]
pub struct CleanupWarning {
    /// Path of the artifact or directory left behind.
    pub path: Utf8PathBuf,
    /// Why it could not be removed.
    pub error: ArtifactError,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not delete {}: {}; the registry entry was removed anyway",
            self.path, self.error
        )
    }
}

/// Result of removing a changelog.
#[derive(Debug)]
pub struct RemovedChangelog {
    /// The changelog which was removed.
    pub changelog: Changelog,
    /// Set if its artifact could not be deleted.
    pub warning: Option<CleanupWarning>,
}

/// Result of removing a project.
#[derive(Debug)]
pub struct RemovedProject {
    /// The project which was removed.
    pub project: Project,
    /// Set if its artifact directory could not be deleted.
    pub warning: Option<CleanupWarning>,
}

/// Parameters for explicitly creating a project.
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Project name.
    pub name: String,
    /// Initial maintained flag.
    pub maintained: bool,
    /// Legacy single download path.
    pub download_path: Option<Utf8PathBuf>,
}

impl NewVersion {
    /// A maintained project without a legacy download path.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maintained: true,
            download_path: None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    store: RegistryStore,
    artifacts: Arc<dyn ArtifactStore>,
    locks: LockManager,
}

/// Registry operations shared by every front end.
///
/// Cheap to clone. Mutations on the same project are serialized, also
/// against other processes using the same registry directory; mutations on
/// different projects only serialize around the short document update.
#[derive(Debug, Clone)]
pub struct RegistryService {
    inner: Arc<Inner>,
}

/// A loaded registry with the document lock held.
struct Transaction<'s> {
    store: &'s RegistryStore,
    registry: Registry,
    _guard: LockGuard,
}

impl Transaction<'_> {
    async fn commit(self) -> RegistryResult<()> {
        self.store.save(&self.registry).await
    }
}

fn validate_name(name: &str) -> RegistryResult<()> {
    if is_valid_project_name(name) {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_owned()))
    }
}

fn not_found(name: &str) -> RegistryError {
    RegistryError::ProjectNotFound(name.to_owned())
}

impl RegistryService {
    /// Assemble a service from its parts.
    pub fn new(
        store: RegistryStore,
        artifacts: Arc<dyn ArtifactStore>,
        locks: LockManager,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                artifacts,
                locks,
            }),
        }
    }

    /// The registry document store.
    pub fn store(&self) -> &RegistryStore {
        &self.inner.store
    }

    /// The lock manager.
    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// The artifact store.
    pub fn artifacts(&self) -> &dyn ArtifactStore {
        self.inner.artifacts.as_ref()
    }

    async fn begin(&self) -> RegistryResult<Transaction<'_>> {
        let guard = self.inner.locks.registry().await?;
        let registry = self.inner.store.load().await?;
        Ok(Transaction {
            store: &self.inner.store,
            registry,
            _guard: guard,
        })
    }

    /// Fail fast for unknown projects, before any lock state is created for
    /// the name. Callers re-check under the lock.
    async fn require_existing(&self, name: &str) -> RegistryResult<()> {
        match self.inner.store.snapshot().await?.find(name) {
            Some(_) => Ok(()),
            None => Err(not_found(name)),
        }
    }

    fn cleanup_warning(
        &self,
        path: &Utf8Path,
        result: Result<(), ArtifactError>,
    ) -> Option<CleanupWarning> {
        match result {
            Ok(()) => None,
            Err(error) => {
                tracing::warn!(%path, %error, "Artifact cleanup failed");
                Some(CleanupWarning {
                    path: path.to_owned(),
                    error,
                })
            }
        }
    }

    /// Ensure a project exists, creating it maintained and empty if not.
    /// Does nothing for an existing project.
    #[tracing::instrument(skip(self))]
    pub async fn add_or_update_version(&self, name: &str) -> RegistryResult<Project> {
        validate_name(name)?;
        let _project = self.inner.locks.project(name).await?;
        let mut txn = self.begin().await?;

        if let Some(project) = txn.registry.find(name) {
            return Ok(project.clone());
        }

        let project = txn.registry.find_or_create(name).clone();
        txn.commit().await?;
        tracing::info!("Created project");
        Ok(project)
    }

    /// Create a project, failing if one with the same name exists.
    #[tracing::instrument(skip(self, version), fields(name = %version.name))]
    pub async fn create_version(&self, version: NewVersion) -> RegistryResult<Project> {
        validate_name(&version.name)?;
        let _project = self.inner.locks.project(&version.name).await?;
        let mut txn = self.begin().await?;

        let mut project = Project::new(version.name);
        project.maintained = version.maintained;
        project.download_path = version.download_path;

        txn.registry
            .insert(project.clone())
            .map_err(|existing| RegistryError::DuplicateProject(existing.version_name))?;
        txn.commit().await?;
        tracing::info!("Created project");
        Ok(project)
    }

    /// Record a new build: store the uploaded artifact, then prepend a
    /// changelog referencing it. The project is created if it is new.
    ///
    /// The artifact is on disk before the changelog is saved. If storing the
    /// artifact fails the registry is left untouched.
    #[tracing::instrument(skip(self, commits, reader), fields(build = tracing::field::Empty))]
    pub async fn add_changelog<R>(
        &self,
        name: &str,
        commits: Vec<CommitInput>,
        filename: &str,
        reader: &mut R,
    ) -> RegistryResult<Changelog>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_name(name)?;
        let commits = commit::resolve(commits);
        let _project = self.inner.locks.project(name).await?;

        // Only holders of the project lock add builds to this project, so
        // the number stays free until we save.
        let build = next_build_number(self.inner.store.snapshot().await?.find(name));
        tracing::Span::current().record("build", build);

        let artifacts = &self.inner.artifacts;
        artifacts
            .reserve_directory(name)
            .await
            .map_err(RegistryError::ArtifactWrite)?;
        let path = artifacts
            .write_artifact(name, build, filename, reader)
            .await
            .map_err(RegistryError::ArtifactWrite)?;

        let changelog = Changelog {
            build_number: build,
            commits,
            timestamp: Timestamp::now(),
            download_path: Some(path.clone()),
        };

        let saved = async {
            let mut txn = self.begin().await?;
            txn.registry
                .find_or_create(name)
                .push_changelog(changelog.clone());
            txn.commit().await
        }
        .await;

        if let Err(error) = saved {
            if let Err(cleanup) = artifacts.delete_artifact(&path).await {
                tracing::warn!(%path, error = %cleanup, "Unable to remove unreferenced artifact");
            }
            return Err(error);
        }

        tracing::info!(build, %path, commits = changelog.commits.len(), "Added changelog");
        Ok(changelog)
    }

    /// Remove one build of a project and delete its artifact.
    ///
    /// Failing to delete the artifact does not stop the removal; it is
    /// reported as a warning instead.
    #[tracing::instrument(skip(self))]
    pub async fn remove_changelog(&self, name: &str, build: u64) -> RegistryResult<RemovedChangelog> {
        validate_name(name)?;
        self.require_existing(name).await?;
        let _project = self.inner.locks.project(name).await?;
        let mut txn = self.begin().await?;

        let project = txn.registry.find_mut(name).ok_or_else(|| not_found(name))?;
        let download_path = project
            .changelog(build)
            .ok_or_else(|| RegistryError::ChangelogNotFound {
                project: name.to_owned(),
                build,
            })?
            .download_path
            .clone();

        let warning = match download_path {
            Some(path) => {
                let result = self.inner.artifacts.delete_artifact(&path).await;
                self.cleanup_warning(&path, result)
            }
            None => None,
        };

        let changelog = project
            .remove_changelog(build)
            .ok_or_else(|| RegistryError::ChangelogNotFound {
                project: name.to_owned(),
                build,
            })?;
        txn.commit().await?;

        tracing::info!("Removed changelog");
        Ok(RemovedChangelog { changelog, warning })
    }

    /// Remove a project and its artifact directory.
    ///
    /// Failing to delete the directory does not stop the removal; it is
    /// reported as a warning instead.
    #[tracing::instrument(skip(self))]
    pub async fn remove_version(&self, name: &str) -> RegistryResult<RemovedProject> {
        validate_name(name)?;
        self.require_existing(name).await?;
        let _project = self.inner.locks.project(name).await?;
        let mut txn = self.begin().await?;

        if txn.registry.find(name).is_none() {
            return Err(not_found(name));
        }

        let result = self.inner.artifacts.delete_project_directory(name).await;
        let warning = self.cleanup_warning(&artifact_store::project_directory(name), result);

        let project = txn.registry.remove(name).ok_or_else(|| not_found(name))?;
        txn.commit().await?;

        tracing::info!(builds = project.build_count(), "Removed project");
        Ok(RemovedProject { project, warning })
    }

    /// Set whether a project is maintained.
    #[tracing::instrument(skip(self))]
    pub async fn set_maintained(&self, name: &str, maintained: bool) -> RegistryResult<Project> {
        validate_name(name)?;
        self.require_existing(name).await?;
        let _project = self.inner.locks.project(name).await?;
        let mut txn = self.begin().await?;

        let project = txn.registry.find_mut(name).ok_or_else(|| not_found(name))?;
        if project.maintained == maintained {
            return Ok(project.clone());
        }
        project.maintained = maintained;
        let project = project.clone();
        txn.commit().await?;

        tracing::info!("Updated maintained status");
        Ok(project)
    }

    /// A snapshot of every project. Takes no locks.
    pub async fn list_projects(&self) -> RegistryResult<Registry> {
        self.inner.store.load().await
    }

    /// A snapshot of one project.
    pub async fn project(&self, name: &str) -> RegistryResult<Project> {
        self.list_projects()
            .await?
            .into_iter()
            .find(|p| p.version_name == name)
            .ok_or_else(|| not_found(name))
    }

    /// A snapshot of one changelog.
    pub async fn changelog(&self, name: &str, build: u64) -> RegistryResult<Changelog> {
        self.project(name)
            .await?
            .changelogs
            .into_iter()
            .find(|c| c.build_number == build)
            .ok_or_else(|| RegistryError::ChangelogNotFound {
                project: name.to_owned(),
                build,
            })
    }
}
