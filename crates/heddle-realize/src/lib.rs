//! Turning resolved locks into runnable workspaces.
//!
//! Realization runs in deterministic phases: plan, sources, models,
//! environment, marker. A warm workspace whose marker matches the lock and
//! whose projections are intact short-circuits the whole thing, which is what
//! keeps job cold-starts cheap.

use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use heddle_cache::{project, Cache, ProjectionError, RepositoryUrl};
use heddle_client::{FetchError, Fetcher};
use heddle_git::{GitError, GitResolver};
use heddle_spec::{ResolvedLock, SpecError};
use heddle_types::ErrorKind;
use heddle_venv::{write_model_paths_config, EnvironmentBuilder, VenvError};

pub use marker::Marker;
pub use plan::{Plan, PlanAction};
pub use workspace::Workspace;

mod marker;
mod plan;
mod workspace;

/// Distinct model blobs downloading at once during realization.
const MODEL_FETCH_PARALLELISM: usize = 4;

#[derive(Debug, Error)]
pub enum RealizeError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Venv(#[from] VenvError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Refusing to delete {}: it does not carry a workspace marker", .0.display())]
    RefusingDelete(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RealizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Git(err) => err.kind(),
            Self::Fetch(err) => err.kind(),
            Self::Venv(err) => err.kind(),
            Self::Spec(err) => err.kind(),
            Self::Projection(_) | Self::Io(_) => ErrorKind::Realization,
            Self::RefusingDelete(_) => ErrorKind::Usage,
        }
    }
}

/// Per-invocation knobs, distinct from what the lock pins.
#[derive(Debug, Clone, Default)]
pub struct RealizeOptions {
    pub offline: bool,
    pub skip_models: bool,
    pub wheels_dir: Option<PathBuf>,
    pub python: Option<PathBuf>,
    /// Replace pre-existing non-symlink projection targets.
    pub overwrite: bool,
}

/// What a realization did.
#[derive(Debug, Clone)]
pub struct RealizeReport {
    pub workspace: PathBuf,
    pub warnings: Vec<String>,
    /// All phases ran to completion and the marker was written.
    pub complete: bool,
    /// Whether any phase actually ran (false on a warm short-circuit).
    pub fresh: bool,
}

/// Orchestrates git, the fetcher, the store and the environment builder.
#[derive(Debug, Clone)]
pub struct Realizer {
    git: GitResolver,
    fetcher: Fetcher,
}

impl Realizer {
    pub fn new(git: GitResolver, fetcher: Fetcher) -> Self {
        Self { git, fetcher }
    }

    pub fn cache(&self) -> &Cache {
        self.fetcher.cache()
    }

    /// The actions a realization would take, without touching anything.
    pub fn plan(
        &self,
        lock: &ResolvedLock,
        workspace: &Workspace,
        options: &RealizeOptions,
    ) -> Result<Plan, RealizeError> {
        let lock_digest = lock.digest()?;
        if self.is_intact(lock, &lock_digest, workspace, options.skip_models)? {
            return Ok(Plan {
                actions: vec![PlanAction::UpToDate],
            });
        }

        let mut actions = Vec::new();
        for source in
            std::iter::once((&lock.engine_source, workspace.engine_dir())).chain(
                lock.extensions.iter().map(|extension| {
                    (extension, workspace.extension_dir(&extension.effective_name()))
                }),
            )
        {
            let (locked, target) = source;
            let repo = RepositoryUrl::new(&locked.repo);
            let cached = self.cache().source_entry(&repo, &locked.commit).is_dir();
            actions.push(PlanAction::Checkout {
                repo: locked.repo.to_string(),
                commit: locked.commit.clone(),
                target,
                cached,
            });
        }

        if options.skip_models {
            if !lock.models.is_empty() {
                actions.push(PlanAction::SkipModels);
            }
        } else {
            for model in &lock.models {
                let cached = self
                    .fetcher
                    .is_cached(&model.source, model.checksum.as_ref())
                    .unwrap_or(false);
                actions.push(PlanAction::FetchModel {
                    source: model.source.clone(),
                    target: workspace.model_target(&model.target_path),
                    cached,
                });
            }
        }

        actions.push(PlanAction::BuildEnvironment {
            installs: 1 + lock.extensions.len(),
            extra_packages: lock.extra_packages.len(),
        });
        actions.push(PlanAction::WriteMarker);
        Ok(Plan { actions })
    }

    /// Materialize `lock` into `workspace`.
    #[instrument(skip_all, fields(version_id = %lock.version_id))]
    pub async fn realize(
        &self,
        lock: &ResolvedLock,
        workspace: &Workspace,
        options: &RealizeOptions,
    ) -> Result<RealizeReport, RealizeError> {
        let lock_digest = lock.digest()?;
        if self.is_intact(lock, &lock_digest, workspace, options.skip_models)? {
            debug!("Workspace {} is up to date", workspace.root().display());
            return Ok(RealizeReport {
                workspace: workspace.root().to_path_buf(),
                warnings: Vec::new(),
                complete: true,
                fresh: false,
            });
        }

        for dir in [
            workspace.root().to_path_buf(),
            workspace.input_dir(),
            workspace.output_dir(),
            workspace.temp_dir(),
            workspace.custom_nodes_dir(),
        ] {
            fs_err::create_dir_all(dir)?;
        }

        // Sources.
        let engine_repo = RepositoryUrl::new(&lock.engine_source.repo);
        let engine_entry = self
            .git
            .materialize(&engine_repo, &lock.engine_source.commit)
            .await?;
        project(&engine_entry, &workspace.engine_dir(), options.overwrite)?;

        let mut extensions = Vec::with_capacity(lock.extensions.len());
        for extension in &lock.extensions {
            let repo = RepositoryUrl::new(&extension.repo);
            let entry = self.git.materialize(&repo, &extension.commit).await?;
            let name = extension.effective_name();
            let target = workspace.extension_dir(&name);
            project(&entry, &target, options.overwrite)?;
            extensions.push((name, target));
        }

        // Models: best-effort offline, fatal online. Distinct keys download
        // with bounded parallelism; same-key fetches collapse in the store.
        let mut warnings = Vec::new();
        let mut complete = true;
        if options.skip_models {
            if !lock.models.is_empty() {
                warn!("Skipping {} model fetch(es)", lock.models.len());
                warnings.push(format!("skipped {} model fetch(es)", lock.models.len()));
            }
        } else {
            let fetched: Vec<_> = futures::stream::iter(lock.models.iter())
                .map(|model| async move {
                    let result = self.fetcher.fetch(&model.source, model.checksum.as_ref()).await;
                    (model, result)
                })
                .buffer_unordered(MODEL_FETCH_PARALLELISM)
                .collect()
                .await;
            for (model, result) in fetched {
                match result {
                    Ok(blob) => {
                        project(
                            &blob,
                            &workspace.model_target(&model.target_path),
                            options.overwrite,
                        )?;
                    }
                    Err(FetchError::OfflineUnavailable { uri }) => {
                        warn!("Model `{uri}` is not cached; continuing without it");
                        warnings.push(format!("model `{uri}` not available offline"));
                        complete = false;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        // Environment.
        write_model_paths_config(workspace.root(), workspace.models_dir())?;
        let builder = EnvironmentBuilder::new(workspace.root())
            .python(options.python.clone())
            .wheels_dir(options.wheels_dir.clone())
            .offline(options.offline);
        builder
            .ensure(&workspace.engine_dir(), &extensions, &lock.extra_packages)
            .await?;

        // Marker: only a complete realization is recorded.
        if complete {
            Marker {
                version_id: lock.version_id.to_string(),
                lock_digest,
            }
            .save(&workspace.marker_path())?;
            info!("Realized {} at {}", lock.version_id, workspace.root().display());
        } else {
            info!(
                "Partially realized {} at {} ({} warning(s))",
                lock.version_id,
                workspace.root().display(),
                warnings.len(),
            );
        }

        Ok(RealizeReport {
            workspace: workspace.root().to_path_buf(),
            warnings,
            complete,
            fresh: true,
        })
    }

    /// Whether the workspace already reflects this lock: matching marker,
    /// every projection present and resolving, environment in place.
    fn is_intact(
        &self,
        lock: &ResolvedLock,
        lock_digest: &str,
        workspace: &Workspace,
        skip_models: bool,
    ) -> Result<bool, io::Error> {
        let Some(marker) = Marker::load_optional(&workspace.marker_path())? else {
            return Ok(false);
        };
        if marker.version_id != lock.version_id.as_str() || marker.lock_digest != lock_digest {
            return Ok(false);
        }
        if !heddle_fs::is_live_symlink(workspace.engine_dir()) {
            return Ok(false);
        }
        for extension in &lock.extensions {
            if !heddle_fs::is_live_symlink(workspace.extension_dir(&extension.effective_name())) {
                return Ok(false);
            }
        }
        if !skip_models {
            for model in &lock.models {
                if !heddle_fs::is_live_symlink(workspace.model_target(&model.target_path)) {
                    return Ok(false);
                }
            }
        }
        let builder = EnvironmentBuilder::new(workspace.root());
        if !builder.venv_python().exists() {
            return Ok(false);
        }
        Ok(workspace.model_paths_config().is_file())
    }
}

/// Remove a workspace and its lock.
///
/// Refuses to delete a directory that does not carry the workspace marker,
/// so a mistyped `--target` cannot take out unrelated data. Optionally also
/// removes model symlinks projected outside the workspace root.
pub fn teardown(
    workspace: &Workspace,
    lock_path: &Path,
    lock: Option<&ResolvedLock>,
    remove_model_links: bool,
) -> Result<(), RealizeError> {
    let root = workspace.root();
    if root.exists() {
        if !workspace.marker_path().exists() {
            return Err(RealizeError::RefusingDelete(root.to_path_buf()));
        }
        if remove_model_links {
            if let Some(lock) = lock {
                for model in &lock.models {
                    let target = workspace.model_target(&model.target_path);
                    if target.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
                        heddle_fs::remove_file_if_exists(&target)?;
                    }
                }
            }
        }
        fs_err::remove_dir_all(root)?;
    }
    heddle_fs::remove_file_if_exists(lock_path)?;
    Ok(())
}
