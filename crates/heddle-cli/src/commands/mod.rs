use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;

use heddle_cache::Cache;
use heddle_client::{Fetcher, FetcherBuilder};
use heddle_config::Config;
use heddle_git::GitResolver;
use heddle_spec::{ResolvedLock, SpecResolver, VersionSpec};
use heddle_types::{ErrorKind, VersionId};

pub(crate) use clone::clone;
pub(crate) use create::create;
pub(crate) use delete::delete;
pub(crate) use list::list;
pub(crate) use realize::realize;
pub(crate) use run_handler::run_handler;
pub(crate) use run_ui::run_ui;
pub(crate) use validate::validate;

mod clone;
mod create;
mod delete;
mod list;
mod realize;
mod run_handler;
mod run_ui;
mod validate;

#[derive(Copy, Clone)]
pub(crate) enum ExitStatus {
    /// The command succeeded.
    Success,
    /// The command failed; the kind selects the exit code.
    Failure(ErrorKind),
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::from(0),
            ExitStatus::Failure(kind) => ExitCode::from(kind.exit_code()),
        }
    }
}

/// A command-level failure that already knows its kind.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub(crate) struct CliError {
    pub(crate) kind: ErrorKind,
    pub(crate) message: String,
}

impl CliError {
    pub(crate) fn usage(message: impl Into<String>) -> anyhow::Error {
        Self {
            kind: ErrorKind::Usage,
            message: message.into(),
        }
        .into()
    }
}

/// The spec file for a version id.
pub(crate) fn spec_path(config: &Config, version_id: &VersionId) -> PathBuf {
    config.specs_dir().join(format!("{version_id}.json"))
}

pub(crate) fn open_cache(config: &Config) -> Result<Cache> {
    Ok(Cache::from_path(config.cache_root())?)
}

pub(crate) fn build_fetcher(config: &Config, cache: &Cache, offline: bool) -> Fetcher {
    FetcherBuilder::new(cache.clone())
        .offline(offline)
        .hub_token(config.hub_token.clone())
        .market_token(config.market_token.clone())
        .build()
}

/// Load a version's lock, resolving its spec first when none exists yet.
pub(crate) async fn load_or_resolve_lock(
    config: &Config,
    cache: &Cache,
    version_id: &VersionId,
    offline: bool,
) -> Result<ResolvedLock> {
    let lock_path = cache.resolved_lock(version_id);
    if let Some(lock) = ResolvedLock::load_optional(&lock_path)? {
        return Ok(lock);
    }
    let spec = VersionSpec::load(&spec_path(config, version_id))?;
    let git = GitResolver::new(cache.clone(), offline);
    let resolver = SpecResolver::new(cache.clone(), git);
    let (lock, _) = resolver.resolve_and_store(&spec).await?;
    Ok(lock)
}
