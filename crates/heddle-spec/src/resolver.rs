use std::path::PathBuf;

use tracing::{debug, instrument};

use heddle_cache::{Cache, RepositoryUrl};
use heddle_client::FetchSource;
use heddle_git::GitResolver;
use heddle_types::VersionId;

use crate::error::SpecError;
use crate::lock::{LockedModel, LockedSource, ResolvedLock};
use crate::model::{SourcePin, VersionSpec};
use crate::validate::{validate_relative_path, validate_spec};

/// Turns specs into resolved locks: validation, ref pinning, model target
/// normalization, idempotent persistence.
#[derive(Debug, Clone)]
pub struct SpecResolver {
    cache: Cache,
    git: GitResolver,
}

impl SpecResolver {
    pub fn new(cache: Cache, git: GitResolver) -> Self {
        Self { cache, git }
    }

    /// Where the lock for `version_id` lives.
    pub fn lock_path(&self, version_id: &VersionId) -> PathBuf {
        self.cache.resolved_lock(version_id)
    }

    /// Resolve a spec without touching the lock on disk.
    #[instrument(skip_all, fields(version_id = %spec.version_id))]
    pub async fn resolve(&self, spec: &VersionSpec) -> Result<ResolvedLock, SpecError> {
        validate_spec(spec)?;

        let engine_source = self.pin(&spec.engine_source).await?;
        let mut extensions = Vec::with_capacity(spec.extensions.len());
        for extension in &spec.extensions {
            let mut pinned = self.pin(extension).await?;
            pinned.name = Some(extension.effective_name());
            extensions.push(pinned);
        }

        let mut models = Vec::with_capacity(spec.models.len());
        for entry in &spec.models {
            let source =
                FetchSource::parse(&entry.source).map_err(|err| SpecError::InvalidModelSource {
                    uri: entry.source.clone(),
                    reason: err.to_string(),
                })?;
            let name = entry.name.clone().unwrap_or_else(|| source.name_hint());
            let target_path = match &entry.target_path {
                Some(target_path) => target_path.clone(),
                None => {
                    let subdir = entry
                        .target_subdir
                        .as_deref()
                        .expect("validated: target_subdir or target_path is present");
                    format!("{}/{name}", subdir.trim_end_matches('/'))
                }
            };
            // The composed path gets the same scrutiny as a written one.
            validate_relative_path(&target_path)?;
            models.push(LockedModel {
                source: entry.source.clone(),
                name,
                target_path,
                checksum: entry.checksum.clone(),
            });
        }

        Ok(ResolvedLock {
            schema_version: spec.schema_version,
            version_id: spec.version_id.clone(),
            engine_source,
            extensions,
            models,
            extra_packages: spec.extra_packages.clone(),
            env: spec.env.clone(),
            options: spec.options,
            resolved_at: 1,
            spec_digest: spec.digest()?,
        })
    }

    /// Resolve and persist. Returns the lock and whether the file changed;
    /// an unchanged resolution leaves the previous bytes untouched, so
    /// repeated resolution is bit-identical.
    pub async fn resolve_and_store(
        &self,
        spec: &VersionSpec,
    ) -> Result<(ResolvedLock, bool), SpecError> {
        let path = self.lock_path(&spec.version_id);
        let existing = ResolvedLock::load_optional(&path)?;

        let mut lock = self.resolve(spec).await?;
        if let Some(existing) = existing {
            if existing.same_resolution(&lock) {
                debug!("Resolution of `{}` is unchanged", spec.version_id);
                return Ok((existing, false));
            }
            lock.resolved_at = existing.resolved_at + 1;
        }
        lock.save(&path)?;
        Ok((lock, true))
    }

    /// Pin one source: accept a commit verbatim, resolve a ref over the
    /// network (or the local clones, offline).
    async fn pin(&self, source: &SourcePin) -> Result<LockedSource, SpecError> {
        let repo = RepositoryUrl::new(&source.repo);
        let commit = match (&source.commit, &source.reference) {
            (Some(commit), _) => commit.to_ascii_lowercase(),
            (None, Some(reference)) => self.git.resolve(&repo, reference).await?,
            (None, None) => unreachable!("validated: ref or commit is present"),
        };
        Ok(LockedSource {
            name: source.name.clone(),
            repo: source.repo.clone(),
            commit,
        })
    }
}
