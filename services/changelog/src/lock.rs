//! Per-project and registry-document locks
//!
//! Every front end may run in its own process, so exclusion is enforced
//! with advisory file locks. The kernel drops those when the holding
//! process exits, which means a crashed writer can never wedge the others.
//! Inside one process an async mutex per key queues tasks fairly before
//! they contend for the file lock.
//!
//! Lock order: a project lock is always taken before the registry lock.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fs4::FileExt;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::error::{RegistryError, RegistryResult};

const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

const REGISTRY_KEY: &str = "registry";

/// Hands out exclusive locks keyed by project name, plus one for the
/// registry document itself.
#[derive(Debug)]
pub struct LockManager {
    dir: Utf8PathBuf,
    timeout: Duration,
    local: Arc<LocalLocks>,
}

type LocalLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Proof that a lock is held. The lock is released on drop.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    acquired: Instant,
    file: std::fs::File,
    local: Option<OwnedMutexGuard<()>>,
    locks: Arc<LocalLocks>,
}

impl LockGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::debug!(key = %self.key, %error, "Unlock failed, closing the file releases it");
        }
        drop(self.local.take());
        forget_idle(&self.locks, &self.key);
        tracing::trace!(key = %self.key, held = ?self.acquired.elapsed(), "Released lock");
    }
}

/// Drop the in-process mutex for `key` once nothing holds or waits on it.
fn forget_idle(locks: &LocalLocks, key: &str) {
    let mut locks = locks.lock();
    if locks
        .get(key)
        .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        locks.remove(key);
    }
}

impl LockManager {
    /// Lock files live in `dir`; acquisition gives up after `timeout`.
    pub fn new(dir: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            local: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Directory holding the lock files.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// How long acquisition waits before failing.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lock a single project. Held across a whole mutating operation.
    pub async fn project(&self, name: &str) -> RegistryResult<LockGuard> {
        let path = self.dir.join("projects").join(format!("{name}.lock"));
        self.acquire(format!("project:{name}"), path).await
    }

    /// Lock the registry document. Held around one load, mutate, save cycle.
    pub async fn registry(&self) -> RegistryResult<LockGuard> {
        let path = self.dir.join(format!("{REGISTRY_KEY}.lock"));
        self.acquire(REGISTRY_KEY.to_owned(), path).await
    }

    fn local(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.local.lock().entry(key.to_owned()).or_default().clone()
    }

    #[tracing::instrument(level = "trace", skip(self, path))]
    async fn acquire(&self, key: String, path: Utf8PathBuf) -> RegistryResult<LockGuard> {
        let started = Instant::now();
        match self.wait(&key, &path, started + self.timeout).await {
            Ok((local, file)) => {
                tracing::trace!(%key, waited = ?started.elapsed(), "Acquired lock");
                Ok(LockGuard {
                    key,
                    acquired: Instant::now(),
                    file,
                    local: Some(local),
                    locks: self.local.clone(),
                })
            }
            Err(error) => {
                forget_idle(&self.local, &key);
                Err(match error {
                    Some(error) => error.into(),
                    None => RegistryError::LockTimeout {
                        key,
                        waited: started.elapsed(),
                    },
                })
            }
        }
    }

    /// Take the in-process mutex, then the file lock. `Err(None)` means the
    /// deadline passed.
    async fn wait(
        &self,
        key: &str,
        path: &Utf8Path,
        deadline: Instant,
    ) -> Result<(OwnedMutexGuard<()>, std::fs::File), Option<io::Error>> {
        let local = tokio::time::timeout_at(deadline, self.local(key).lock_owned())
            .await
            .map_err(|_| None)?;

        let file = open_lock_file(path).await?;
        let mut backoff = MIN_BACKOFF;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok((local, file)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(None);
                    }
                    tracing::debug!(%key, "Lock held by another process, waiting");
                    tokio::time::sleep(backoff.min(deadline - now)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(Some(err)),
            }
        }
    }
}

async fn open_lock_file(path: &Utf8Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file.into_std().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir, timeout: Duration) -> LockManager {
        let root = Utf8Path::from_path(dir.path()).expect("utf-8 path");
        LockManager::new(root.join(".locks"), timeout)
    }

    #[tokio::test]
    async fn lock_is_exclusive_within_a_process() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(&dir, Duration::from_millis(50));

        let guard = locks.project("Foo").await.unwrap();
        let err = locks.project("Foo").await.unwrap_err();
        assert!(matches!(err, RegistryError::LockTimeout { .. }));
        assert!(err.is_retryable());

        drop(guard);
        locks.project("Foo").await.unwrap();
    }

    #[tokio::test]
    async fn lock_is_exclusive_across_managers() {
        // Two managers share nothing in memory, like two processes.
        let dir = tempfile::tempdir().unwrap();
        let first = manager(&dir, Duration::from_millis(50));
        let second = manager(&dir, Duration::from_millis(50));

        let guard = first.project("Foo").await.unwrap();
        assert!(second.project("Foo").await.is_err());
        drop(guard);
        second.project("Foo").await.unwrap();
    }

    #[tokio::test]
    async fn different_projects_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(&dir, Duration::from_millis(50));

        let _foo = locks.project("Foo").await.unwrap();
        let _bar = locks.project("Bar").await.unwrap();
        let _registry = locks.registry().await.unwrap();
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(&dir, Duration::from_millis(50));

        for i in 0..10 {
            locks.project(&format!("Project{i}")).await.unwrap();
        }
        assert!(locks.local.lock().is_empty());

        let guard = locks.project("Foo").await.unwrap();
        assert_eq!(locks.local.lock().len(), 1);

        let other = manager(&dir, Duration::from_millis(20));
        assert!(other.project("Foo").await.is_err());
        assert!(other.local.lock().is_empty());

        drop(guard);
        assert!(locks.local.lock().is_empty());
    }

    #[tokio::test]
    async fn queued_waiter_keeps_its_key() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(manager(&dir, Duration::from_secs(5)));

        let guard = locks.project("Foo").await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.project("Foo").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(locks.local.lock().len(), 1);
        assert!(manager(&dir, Duration::from_millis(50)).project("Foo").await.is_err());

        drop(second);
        assert!(locks.local.lock().is_empty());
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(manager(&dir, Duration::from_secs(5)));

        let guard = locks.project("Foo").await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.project("Foo").await.map(|g| g.key().to_owned()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert_eq!(waiter.await.unwrap().unwrap(), "project:Foo");
    }
}
