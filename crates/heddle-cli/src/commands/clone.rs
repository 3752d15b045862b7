use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_spec::VersionSpec;
use heddle_types::VersionId;

use crate::commands::{spec_path, CliError, ExitStatus};
use crate::printer::Printer;

/// Copy a spec under a new id. Locks and workspaces are not copied; the
/// clone re-resolves on its own schedule.
pub(crate) fn clone(
    config: &Config,
    src_id: &str,
    dst_id: &str,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let src_id: VersionId = src_id.parse()?;
    let dst_id: VersionId = dst_id.parse()?;
    if src_id == dst_id {
        return Err(CliError::usage("source and destination ids are the same"));
    }

    let mut spec = VersionSpec::load(&spec_path(config, &src_id))?;
    spec.version_id = dst_id.clone();

    let dst_path = spec_path(config, &dst_id);
    if dst_path.exists() {
        return Err(CliError::usage(format!(
            "spec `{}` already exists",
            dst_path.display()
        )));
    }
    spec.save(&dst_path)?;
    writeln!(
        printer,
        "Cloned {} to {} ({})",
        src_id,
        dst_id,
        format!("{}", dst_path.display()).cyan()
    )?;
    Ok(ExitStatus::Success)
}
