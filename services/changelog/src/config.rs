//! Registry configuration and the builder for [`RegistryService`]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use artifact_store::{ArtifactStore, LocalArtifacts};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::lock::LockManager;
use crate::service::RegistryService;
use crate::store::RegistryStore;

/// Registry document location relative to the root.
pub const DEFAULT_REGISTRY_PATH: &str = "config/downloads.json";

/// How long to wait for a lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted upload body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Directory next to the registry document which holds lock files.
pub const LOCK_DIR: &str = ".locks";

fn default_root() -> Utf8PathBuf {
    Utf8PathBuf::from(".")
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_secs()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Settings shared by the command line and HTTP front ends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Registry root; artifacts live below `<root>/downloads`.
    #[serde(default = "default_root")]
    pub root: Utf8PathBuf,

    /// Registry document. Relative paths are resolved against `root`.
    #[serde(default)]
    pub registry: Option<Utf8PathBuf>,

    /// Lock acquisition timeout in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,

    /// Upload body limit for the HTTP front end.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Listen address for the HTTP front end.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            registry: None,
            lock_timeout: default_lock_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            listen: default_listen(),
        }
    }
}

impl RegistryConfig {
    /// Where the registry document lives.
    pub fn registry_path(&self) -> Utf8PathBuf {
        resolve(&self.root, self.registry.as_deref())
    }

    /// A builder preloaded with these settings.
    pub fn builder(&self) -> RegistryBuilder {
        RegistryBuilder::new(self.root.clone())
            .registry_path(self.registry_path())
            .lock_timeout(Duration::from_secs(self.lock_timeout))
    }

    /// Build a service from these settings.
    pub fn build(&self) -> RegistryService {
        self.builder().build()
    }
}

fn resolve(root: &Utf8Path, registry: Option<&Utf8Path>) -> Utf8PathBuf {
    match registry {
        Some(path) if path.is_absolute() => path.to_owned(),
        Some(path) => root.join(path),
        None => root.join(DEFAULT_REGISTRY_PATH),
    }
}

/// Builder for configuring and creating a [`RegistryService`]
#[derive(Debug)]
pub struct RegistryBuilder {
    root: Utf8PathBuf,
    registry_path: Option<Utf8PathBuf>,
    lock_timeout: Duration,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl RegistryBuilder {
    /// Create a builder for the registry rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry_path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            artifacts: None,
        }
    }

    /// Set the registry document path. Relative paths are resolved against
    /// the root.
    pub fn registry_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// Set the lock acquisition timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Use a custom artifact store instead of the local filesystem under the
    /// root.
    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Build the registry service
    pub fn build(self) -> RegistryService {
        let registry = resolve(&self.root, self.registry_path.as_deref());
        let lock_dir = match registry.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.join(LOCK_DIR),
            _ => Utf8PathBuf::from(LOCK_DIR),
        };
        let artifacts = self
            .artifacts
            .unwrap_or_else(|| Arc::new(LocalArtifacts::new(self.root)));

        tracing::debug!(%registry, %lock_dir, root = %artifacts.root(), "Configured registry");

        RegistryService::new(
            RegistryStore::new(registry),
            artifacts,
            LockManager::new(lock_dir, self.lock_timeout),
        )
    }
}
