//! Ref resolution and commit materialization.
//!
//! Both operations drive the `git` CLI rather than linking a git library: the
//! engine hosts ship one, and the CLI's transport handling (credentials,
//! proxies, partial clone) is the behavior operators already rely on.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

use heddle_cache::{Cache, RepositoryUrl, Sentinel, SentinelError};
use heddle_types::ErrorKind;

pub use crate::git::looks_like_commit;
use crate::git::{git, parse_ls_remote};

mod git;

/// How long a caller waits for a concurrent clone of the same entry.
const CLONE_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum GitError {
    #[error("`git {action}` failed for `{repo}`:\n{stderr}")]
    Command {
        action: &'static str,
        repo: String,
        stderr: String,
    },
    #[error("Ref `{reference}` not found in `{repo}`")]
    RefNotFound { reference: String, repo: String },
    #[error("Commit `{commit}` not found in `{repo}`")]
    CommitNotFound { commit: String, repo: String },
    #[error("Offline mode: {0} is not available in the cache")]
    OfflineUnavailable(String),
    #[error(transparent)]
    Sentinel(#[from] SentinelError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Command { .. } => ErrorKind::Network,
            Self::RefNotFound { .. } | Self::CommitNotFound { .. } => ErrorKind::Validation,
            Self::OfflineUnavailable(_) => ErrorKind::OfflineUnavailable,
            Self::Sentinel(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Resolves refs to commits and materializes commits into the shared source
/// cache.
#[derive(Debug, Clone)]
pub struct GitResolver {
    cache: Cache,
    offline: bool,
}

impl GitResolver {
    pub fn new(cache: Cache, offline: bool) -> Self {
        Self { cache, offline }
    }

    /// Look up the commit hash of `reference` in `repo`.
    ///
    /// Online, this is a `git ls-remote` round trip and never clones. Offline,
    /// the answer must come from an existing clone in the cache.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(
        &self,
        repo: &RepositoryUrl,
        reference: &str,
    ) -> Result<String, GitError> {
        // A full hash needs no lookup.
        if looks_like_commit(reference) {
            return Ok(reference.to_ascii_lowercase());
        }

        if self.offline {
            return self.resolve_offline(repo, reference).await;
        }

        let peel = format!("{reference}^{{}}");
        let output = git(
            None,
            ["ls-remote", repo.as_url().as_str(), reference, peel.as_str()],
        )
        .await?
        .map_err(|stderr| GitError::Command {
            action: "ls-remote",
            repo: repo.to_string(),
            stderr,
        })?;

        parse_ls_remote(&output, reference).ok_or_else(|| GitError::RefNotFound {
            reference: reference.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Answer `resolve` from local clones only.
    async fn resolve_offline(
        &self,
        repo: &RepositoryUrl,
        reference: &str,
    ) -> Result<String, GitError> {
        for entry in self.local_entries(repo)? {
            let spec = format!("{reference}^{{commit}}");
            if let Ok(output) = git(
                Some(entry.as_path()),
                ["rev-parse", "--verify", "--quiet", spec.as_str()],
            )
            .await?
            {
                let commit = output.trim().to_string();
                if looks_like_commit(&commit) {
                    debug!("Resolved `{reference}` to {commit} from {}", entry.display());
                    return Ok(commit);
                }
            }
        }
        Err(GitError::OfflineUnavailable(format!(
            "ref `{reference}` of `{repo}`"
        )))
    }

    /// Ensure a clean worktree of `repo` at `commit` exists in the cache and
    /// return its path. Idempotent; concurrent callers collapse onto one
    /// clone.
    #[instrument(skip(self), level = "debug")]
    pub async fn materialize(
        &self,
        repo: &RepositoryUrl,
        commit: &str,
    ) -> Result<PathBuf, GitError> {
        let entry = self.cache.source_entry(repo, commit);
        let sentinel_path = entry.with_file_name(format!(
            "{}.cloning",
            entry.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
        ));

        // Fast path: ready entry, nobody cloning.
        if entry.is_dir() && !Sentinel::exists(&sentinel_path) {
            return Ok(entry);
        }

        if self.offline {
            return Err(GitError::OfflineUnavailable(format!(
                "source `{repo}` at {commit}"
            )));
        }

        let sentinel = Sentinel::acquire(sentinel_path, CLONE_WAIT).await?;
        // A concurrent caller may have published while we waited.
        if entry.is_dir() {
            sentinel.release()?;
            return Ok(entry);
        }

        let result = self.clone_and_checkout(repo, commit, &entry).await;
        sentinel.release()?;
        result?;
        Ok(entry)
    }

    async fn clone_and_checkout(
        &self,
        repo: &RepositoryUrl,
        commit: &str,
        entry: &std::path::Path,
    ) -> Result<(), GitError> {
        let staging = heddle_fs::staging_path(entry, "clone");
        heddle_fs::remove_dir_all_if_exists(&staging)?;

        let cloned: Result<(), GitError> = async {
            git(
                None,
                [
                    "clone",
                    "--quiet",
                    "--filter=blob:none",
                    repo.as_url().as_str(),
                    staging.to_str().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, "non-UTF-8 cache path")
                    })?,
                ],
            )
            .await?
            .map_err(|stderr| GitError::Command {
                action: "clone",
                repo: repo.to_string(),
                stderr,
            })?;

            // The commit may not be reachable from the default branch; fetch
            // it explicitly before giving up.
            let checkout = ["checkout", "--quiet", "--detach", commit];
            if git(Some(staging.as_path()), checkout).await?.is_err() {
                let _ =
                    git(Some(staging.as_path()), ["fetch", "--quiet", "origin", commit]).await?;
                git(Some(staging.as_path()), checkout)
                    .await?
                    .map_err(|_| GitError::CommitNotFound {
                        commit: commit.to_string(),
                        repo: repo.to_string(),
                    })?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = cloned {
            // A partial entry must never become visible.
            heddle_fs::remove_dir_all_if_exists(&staging)?;
            return Err(err);
        }

        match fs_err::rename(&staging, entry) {
            Ok(()) => Ok(()),
            // Lost a publish race; the other side's entry is just as good.
            Err(_) if entry.is_dir() => {
                heddle_fs::remove_dir_all_if_exists(&staging)?;
                Ok(())
            }
            Err(err) => {
                heddle_fs::remove_dir_all_if_exists(&staging)?;
                Err(err.into())
            }
        }
    }

    /// Existing cache entries for `repo`, newest first.
    fn local_entries(&self, repo: &RepositoryUrl) -> Result<Vec<PathBuf>, GitError> {
        let bucket = self.cache.bucket(heddle_cache::CacheBucket::Sources);
        let prefix = format!("{}@", repo.slug());
        let mut entries = Vec::new();
        let read_dir = match fs_err::read_dir(&bucket) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && dir_entry.path().is_dir() {
                entries.push(dir_entry.path());
            }
        }
        entries.sort_by_cached_key(|path| {
            std::cmp::Reverse(
                path.metadata()
                    .and_then(|metadata| metadata.modified())
                    .ok(),
            )
        });
        Ok(entries)
    }
}
