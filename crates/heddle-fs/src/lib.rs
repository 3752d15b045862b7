//! Filesystem primitives shared across the workspace.
//!
//! Everything that publishes data follows the same discipline: write to a
//! temporary sibling, flush, then atomically rename into place. Readers only
//! ever observe fully written files.

use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::trace;

/// Write `data` to `path` atomically: temp file in the same directory, fsync,
/// rename.
pub fn write_atomic_sync(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> io::Result<()> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(data.as_ref())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    trace!("Wrote {}", path.display());
    Ok(())
}

/// Create `dst` as a symlink to `src`, replacing whatever symlink was there.
///
/// The replacement is atomic: the new link is created under a temporary name
/// next to `dst` and renamed over it, so concurrent readers see either the
/// old target or the new one.
pub fn replace_symlink(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    let parent = dst
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!(
        ".{}.{}",
        dst.file_name().and_then(|name| name.to_str()).unwrap_or("link"),
        std::process::id(),
    ));
    // A stale staging link from a crashed writer is fair game.
    match fs::remove_file(&staging) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    symlink(src, &staging)?;
    fs::rename(&staging, dst)?;
    trace!("Linked {} -> {}", dst.display(), src.display());
    Ok(())
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs_err::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

/// Whether `path` is a symlink that resolves to an existing target.
pub fn is_live_symlink(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    path.symlink_metadata()
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false)
        && path.exists()
}

/// Remove a file or symlink if present; missing is fine.
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove a directory tree if present; missing is fine.
pub fn remove_dir_all_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_dir_all(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// A temporary sibling path for staging content next to `target` before an
/// atomic rename, unique per process and call.
pub fn staging_path(target: &Path, label: &str) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    target.with_file_name(format!(
        ".{file_name}.{label}.{}.{:08x}",
        std::process::id(),
        // Not security sensitive, only collision avoidance between threads.
        std::time::UNIX_EPOCH
            .elapsed()
            .map(|d| d.subsec_nanos())
            .unwrap_or(0),
    ))
}

#[cfg(test)]
mod tests {
    use assert_fs::prelude::*;

    use super::{is_live_symlink, replace_symlink, write_atomic_sync};

    #[test]
    fn write_atomic_creates_parents() {
        let dir = assert_fs::TempDir::new().unwrap();
        let target = dir.child("a/b/c.json");
        write_atomic_sync(target.path(), b"{}").unwrap();
        target.assert("{}");
    }

    #[test]
    fn replace_symlink_repoints() {
        let dir = assert_fs::TempDir::new().unwrap();
        let first = dir.child("first");
        first.write_str("one").unwrap();
        let second = dir.child("second");
        second.write_str("two").unwrap();
        let link = dir.child("link");

        replace_symlink(first.path(), link.path()).unwrap();
        assert_eq!(fs_err::read_to_string(link.path()).unwrap(), "one");

        replace_symlink(second.path(), link.path()).unwrap();
        assert_eq!(fs_err::read_to_string(link.path()).unwrap(), "two");
        assert!(is_live_symlink(link.path()));
    }

    #[test]
    fn dangling_symlink_is_not_live() {
        let dir = assert_fs::TempDir::new().unwrap();
        let gone = dir.child("gone");
        gone.write_str("x").unwrap();
        let link = dir.child("link");
        replace_symlink(gone.path(), link.path()).unwrap();
        fs_err::remove_file(gone.path()).unwrap();
        assert!(!is_live_symlink(link.path()));
    }
}
