use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_git::GitResolver;
use heddle_realize::{RealizeOptions, Realizer, Workspace};
use heddle_types::VersionId;

use crate::commands::{build_fetcher, load_or_resolve_lock, open_cache, ExitStatus};
use crate::printer::Printer;

/// Materialize a version into its workspace.
#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
pub(crate) async fn realize(
    config: &Config,
    version_id: &str,
    target: Option<PathBuf>,
    offline: bool,
    wheels_dir: Option<PathBuf>,
    skip_models: bool,
    overwrite: bool,
    dry_run: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let offline = offline || config.offline;

    let cache = open_cache(config)?;
    let lock = load_or_resolve_lock(config, &cache, &version_id, offline).await?;
    // The spec's own options compose with the flags and the environment.
    let offline = offline || lock.options.offline;
    let skip_models = skip_models || lock.options.skip_models;

    let workspace = Workspace::new(target.unwrap_or_else(|| config.workspace_dir(&version_id)))
        .with_models_dir(config.models_dir.clone());
    let realizer = Realizer::new(
        GitResolver::new(cache.clone(), offline),
        build_fetcher(config, &cache, offline),
    );
    let options = RealizeOptions {
        offline,
        skip_models,
        wheels_dir,
        python: None,
        overwrite,
    };

    if dry_run {
        let plan = realizer.plan(&lock, &workspace, &options)?;
        writeln!(printer, "Plan for {}:", version_id.to_string().cyan())?;
        write!(printer, "{plan}")?;
        return Ok(ExitStatus::Success);
    }

    let report = realizer.realize(&lock, &workspace, &options).await?;
    for warning in &report.warnings {
        writeln!(printer, "{} {warning}", "warning:".yellow().bold())?;
    }
    let state = match (report.fresh, report.complete) {
        (false, _) => "Up to date",
        (true, true) => "Realized",
        (true, false) => "Partially realized",
    };
    writeln!(
        printer,
        "{state} {} at {}",
        version_id,
        format!("{}", report.workspace.display()).cyan()
    )?;
    Ok(ExitStatus::Success)
}
