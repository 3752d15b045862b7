use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_realize::{teardown, Workspace};
use heddle_spec::ResolvedLock;
use heddle_types::VersionId;

use crate::commands::{open_cache, spec_path, ExitStatus};
use crate::printer::Printer;

/// Remove a version's workspace and lock; optionally also its spec.
pub(crate) fn delete(
    config: &Config,
    version_id: &str,
    remove_spec: bool,
    remove_models_symlinks: bool,
    target: Option<PathBuf>,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let cache = open_cache(config)?;
    let lock_path = cache.resolved_lock(&version_id);
    let lock = ResolvedLock::load_optional(&lock_path)?;

    let workspace = Workspace::new(target.unwrap_or_else(|| config.workspace_dir(&version_id)))
        .with_models_dir(config.models_dir.clone());
    teardown(&workspace, &lock_path, lock.as_ref(), remove_models_symlinks)?;
    writeln!(
        printer,
        "Removed workspace {}",
        format!("{}", workspace.root().display()).cyan()
    )?;

    if remove_spec {
        let spec = spec_path(config, &version_id);
        heddle_fs::remove_file_if_exists(&spec)?;
        writeln!(printer, "Removed spec {}", format!("{}", spec.display()).cyan())?;
    }
    Ok(ExitStatus::Success)
}
