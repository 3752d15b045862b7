use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_git::GitResolver;
use heddle_spec::{SpecResolver, VersionSpec};
use heddle_types::VersionId;

use crate::commands::{open_cache, spec_path, ExitStatus};
use crate::printer::Printer;

/// Resolve a spec, write its lock (unless dry-run) and print the plan.
pub(crate) async fn validate(
    config: &Config,
    version_id: &str,
    dry_run: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let spec = VersionSpec::load(&spec_path(config, &version_id))?;

    let cache = open_cache(config)?;
    let resolver = SpecResolver::new(cache.clone(), GitResolver::new(cache, config.offline));
    let (lock, updated) = if dry_run {
        (resolver.resolve(&spec).await?, false)
    } else {
        resolver.resolve_and_store(&spec).await?
    };

    writeln!(printer, "Resolved {}", version_id.to_string().cyan())?;
    writeln!(printer, "  spec digest {}", lock.spec_digest)?;
    writeln!(
        printer,
        "  engine    {} @ {}",
        lock.engine_source.repo,
        &lock.engine_source.commit[..12],
    )?;
    for extension in &lock.extensions {
        writeln!(
            printer,
            "  extension {} @ {} -> custom_nodes/{}",
            extension.repo,
            &extension.commit[..12],
            extension.effective_name(),
        )?;
    }
    for model in &lock.models {
        writeln!(printer, "  model     {} -> {}", model.source, model.target_path)?;
    }
    if !lock.extra_packages.is_empty() {
        writeln!(printer, "  packages  {}", lock.extra_packages.join(", "))?;
    }

    if dry_run {
        writeln!(printer, "Dry run; lock not written")?;
    } else {
        let state = if updated { "updated" } else { "unchanged" };
        writeln!(
            printer,
            "Lock {} at {}",
            state,
            format!("{}", resolver.lock_path(&version_id).display()).cyan()
        )?;
    }
    Ok(ExitStatus::Success)
}
