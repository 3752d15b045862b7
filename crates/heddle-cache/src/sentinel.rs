use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fs_err as fs;
use thiserror::Error;
use tracing::{debug, warn};

/// A cross-process mutual-exclusion marker for one cache key.
///
/// Sibling worker processes share the cache directories, so an in-process
/// mutex cannot serialize same-key writers. The lock is a sentinel file
/// created exclusively next to the entry it guards; waiters poll with
/// exponential backoff until the holder releases it or the wait budget runs
/// out.
#[derive(Debug)]
pub struct Sentinel {
    path: PathBuf,
    released: bool,
}

impl Sentinel {
    /// Acquire the sentinel at `path`, waiting up to `wait` for a concurrent
    /// holder.
    pub async fn acquire(path: PathBuf, wait: Duration) -> Result<Self, SentinelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SentinelError::Io)?;
        }

        let start = Instant::now();
        let mut backoff = Duration::from_millis(50);
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // The pid is informational, for operators inspecting a
                    // wedged cache.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= wait {
                        return Err(SentinelError::Timeout {
                            path,
                            waited: start.elapsed(),
                        });
                    }
                    debug!("Waiting for concurrent holder of {}", path.display());
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(1));
                }
                Err(err) => return Err(SentinelError::Io(err)),
            }
        }
    }

    /// Whether a sentinel currently exists at `path`.
    pub fn exists(path: &std::path::Path) -> bool {
        path.exists()
    }

    /// Remove the sentinel, unblocking waiters.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("Failed to remove sentinel {}: {err}", self.path.display());
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Timed out after {waited:?} waiting for a concurrent writer of {}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },
    #[error(transparent)]
    Io(io::Error),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Sentinel, SentinelError};

    #[tokio::test]
    async fn acquire_then_release_unblocks_the_next_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry").join(".lock");

        let held = Sentinel::acquire(path.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(Sentinel::exists(&path));
        held.release().unwrap();
        assert!(!Sentinel::exists(&path));

        let reacquired = Sentinel::acquire(path.clone(), Duration::from_millis(10)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let _held = Sentinel::acquire(path.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        let contender = Sentinel::acquire(path.clone(), Duration::from_millis(120)).await;
        assert!(matches!(contender, Err(SentinelError::Timeout { .. })));
    }

    #[tokio::test]
    async fn drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        {
            let _held = Sentinel::acquire(path.clone(), Duration::from_millis(10))
                .await
                .unwrap();
            assert!(Sentinel::exists(&path));
        }
        assert!(!Sentinel::exists(&path));
    }
}
