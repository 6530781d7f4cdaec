//! Crash-safe file replacement.
//!
//! Contents are written to a temporary file in the destination directory,
//! flushed to disk, and renamed over the destination. Readers observe either
//! the previous file or the complete new one, never a partial write.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::Reader;

fn parent_dir(target: &Utf8Path) -> &Utf8Path {
    match target.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

fn temp_prefix(target: &Utf8Path) -> String {
    format!(".{}.", target.file_name().unwrap_or("artifact"))
}

/// Flush directory metadata so a completed rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Utf8Path) {
    if let Err(error) = std::fs::File::open(dir).and_then(|dir| dir.sync_all()) {
        tracing::trace!(%dir, %error, "unable to fsync directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Utf8Path) {}

/// Replace `target` with `contents` atomically.
///
/// This is blocking, and should be run on a blocking thread from async code.
pub fn write_atomic(target: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let dir = parent_dir(target);
    let mut tmp = tempfile::Builder::new()
        .prefix(&temp_prefix(target))
        .suffix(".tmp")
        .tempfile_in(dir)?;

    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|err| err.error)?;

    sync_dir(dir);
    Ok(())
}

/// Stream `reader` into `target` atomically, returning the number of bytes written.
///
/// The temporary file is removed if any step fails before the rename.
pub async fn persist_reader(target: &Utf8Path, reader: &mut Reader<'_>) -> io::Result<u64> {
    let dir = parent_dir(target).to_owned();
    let prefix = temp_prefix(target);

    let tmp = {
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".part")
                .tempfile_in(dir)
        })
        .in_current_span()
        .await
        .map_err(io::Error::other)??
    };

    let (file, temp_path) = tmp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let target: Utf8PathBuf = target.to_owned();
    tokio::task::spawn_blocking(move || {
        temp_path.persist(&target).map_err(|err| err.error)?;
        sync_dir(&dir);
        Ok::<_, io::Error>(())
    })
    .in_current_span()
    .await
    .map_err(io::Error::other)??;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8Path::from_path(dir.path()).expect("utf-8 path").to_owned()
    }

    fn entries(dir: &Utf8Path) -> Vec<String> {
        let mut names: Vec<_> = dir
            .read_dir_utf8()
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = utf8(&dir).join("doc.json");

        write_atomic(&target, b"[1]").unwrap();
        write_atomic(&target, b"[1, 2]").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"[1, 2]");
        assert_eq!(entries(&utf8(&dir)), vec!["doc.json".to_owned()]);
    }

    #[tokio::test]
    async fn persist_reader_lands_all_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = utf8(&dir).join("Foo-1.jar");
        let payload = vec![7u8; 64 * 1024];

        let written = persist_reader(&target, &mut payload.as_slice()).await.unwrap();

        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
        assert_eq!(entries(&utf8(&dir)), vec!["Foo-1.jar".to_owned()]);
    }

    #[tokio::test]
    async fn persist_reader_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(&dir);
        // A directory in the way makes the final rename fail.
        std::fs::create_dir(root.join("Foo-1.jar")).unwrap();
        std::fs::write(root.join("Foo-1.jar").join("occupied"), b"x").unwrap();

        let result = persist_reader(&root.join("Foo-1.jar"), &mut &b"data"[..]).await;

        assert!(result.is_err());
        assert_eq!(entries(&root), vec!["Foo-1.jar".to_owned()]);
    }
}
