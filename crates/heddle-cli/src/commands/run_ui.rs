use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_git::GitResolver;
use heddle_handler::EngineLaunch;
use heddle_realize::{RealizeOptions, Realizer, Workspace};
use heddle_types::{ErrorKind, VersionId};

use crate::commands::{build_fetcher, load_or_resolve_lock, open_cache, ExitStatus};
use crate::printer::Printer;

/// Realize, then run the engine's interactive server in the foreground.
pub(crate) async fn run_ui(
    config: &Config,
    version_id: &str,
    host: Option<String>,
    port: u16,
    engine_args: Vec<String>,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let cache = open_cache(config)?;
    let lock = load_or_resolve_lock(config, &cache, &version_id, config.offline).await?;
    let offline = config.offline || lock.options.offline;

    let workspace = Workspace::new(config.workspace_dir(&version_id))
        .with_models_dir(config.models_dir.clone());
    let realizer = Realizer::new(
        GitResolver::new(cache.clone(), offline),
        build_fetcher(config, &cache, offline),
    );
    realizer
        .realize(
            &lock,
            &workspace,
            &RealizeOptions {
                offline,
                skip_models: lock.options.skip_models,
                ..RealizeOptions::default()
            },
        )
        .await?;

    let mut launch = EngineLaunch::new(workspace);
    launch.env = lock.env.clone();
    launch.host = host;
    launch.port = port;
    launch.extra_args = engine_args;
    writeln!(
        printer,
        "Starting engine for {} on port {}",
        version_id.to_string().cyan(),
        port
    )?;

    // Foreground: the engine inherits our terminal until it exits.
    let status = launch.command().spawn()?.wait().await?;
    if status.success() {
        Ok(ExitStatus::Success)
    } else {
        writeln!(printer, "Engine exited with {status}")?;
        Ok(ExitStatus::Failure(ErrorKind::EngineExec))
    }
}
