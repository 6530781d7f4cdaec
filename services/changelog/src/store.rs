//! Durable storage for the registry document

use std::io;

use artifact_store::atomic;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::Instrument;

use crate::error::{RegistryError, RegistryResult};
use crate::model::Registry;

/// Loads and saves the whole registry document.
///
/// Saves replace the document atomically, so concurrent readers and a crash
/// mid-save only ever see a complete document.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: Utf8PathBuf,
}

impl RegistryStore {
    /// Create a store for the document at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the registry document.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    async fn read(&self) -> RegistryResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn parse(&self, contents: &[u8]) -> RegistryResult<Registry> {
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(Registry::default());
        }
        serde_json::from_slice(contents).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the registry.
    ///
    /// A missing document is an empty registry. So is a document which does
    /// not parse: the failure is logged, and a copy of the unreadable
    /// document is kept next to it as `<name>.corrupt` before anything can
    /// overwrite it.
    #[tracing::instrument(skip(self), fields(path = %self.path))]
    pub async fn load(&self) -> RegistryResult<Registry> {
        let Some(contents) = self.read().await? else {
            tracing::trace!("Registry document absent");
            return Ok(Registry::default());
        };

        match self.parse(&contents) {
            Ok(registry) => Ok(registry),
            Err(error) => {
                tracing::warn!(%error, "Registry document is corrupt, treating it as empty");
                self.keep_corrupt_copy(contents).await;
                Ok(Registry::default())
            }
        }
    }

    /// Read the registry without side effects. A corrupt document reads as
    /// empty; keeping its copy is left to [`load`](Self::load).
    pub async fn snapshot(&self) -> RegistryResult<Registry> {
        match self.read().await? {
            Some(contents) => Ok(self.parse(&contents).unwrap_or_default()),
            None => Ok(Registry::default()),
        }
    }

    /// Load the registry, failing with [`RegistryError::Corrupt`] if the
    /// document does not parse.
    pub async fn load_strict(&self) -> RegistryResult<Registry> {
        match self.read().await? {
            Some(contents) => self.parse(&contents),
            None => Ok(Registry::default()),
        }
    }

    /// Atomically replace the document with `registry`.
    #[tracing::instrument(skip(self, registry), fields(path = %self.path, projects = registry.len()))]
    pub async fn save(&self, registry: &Registry) -> RegistryResult<()> {
        let contents = encode(registry)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic::write_atomic(&path, &contents))
            .in_current_span()
            .await
            .map_err(io::Error::other)??;

        tracing::trace!("Saved registry document");
        Ok(())
    }

    async fn keep_corrupt_copy(&self, contents: Vec<u8>) {
        let backup = self.path.with_extension(match self.path.extension() {
            Some(ext) => format!("{ext}.corrupt"),
            None => "corrupt".to_owned(),
        });

        let result = {
            let backup = backup.clone();
            tokio::task::spawn_blocking(move || atomic::write_atomic(&backup, &contents))
                .in_current_span()
                .await
                .map_err(io::Error::other)
                .and_then(|result| result)
        };

        match result {
            Ok(()) => tracing::warn!(%backup, "Kept a copy of the corrupt registry document"),
            Err(error) => tracing::error!(%backup, %error, "Unable to copy corrupt registry document"),
        }
    }
}

/// Encode a registry the way it is stored: two-space indentation, fields in
/// declaration order, no trailing newline.
pub fn encode(registry: &Registry) -> RegistryResult<Vec<u8>> {
    serde_json::to_vec_pretty(registry).map_err(RegistryError::Serialize)
}
