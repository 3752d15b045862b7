use std::fmt::Write;
use std::io;

use anyhow::Result;

use heddle_config::Config;
use heddle_realize::Workspace;
use heddle_types::VersionId;

use crate::commands::{open_cache, ExitStatus};
use crate::printer::Printer;

/// Enumerate known versions with their lock and realization state.
pub(crate) fn list(config: &Config, mut printer: Printer) -> Result<ExitStatus> {
    let cache = open_cache(config)?;

    let mut ids: Vec<VersionId> = Vec::new();
    match fs_err::read_dir(config.specs_dir()) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = stem.parse() {
                        ids.push(id);
                    }
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    ids.sort();

    if ids.is_empty() {
        writeln!(printer, "No versions; start with `heddle create`")?;
        return Ok(ExitStatus::Success);
    }

    for id in ids {
        let locked = cache.resolved_lock(&id).is_file();
        let realized = Workspace::new(config.workspace_dir(&id))
            .marker_path()
            .is_file();
        let state = match (locked, realized) {
            (_, true) => "realized",
            (true, false) => "locked",
            (false, false) => "spec",
        };
        writeln!(printer, "{id:<32} {state}")?;
    }
    Ok(ExitStatus::Success)
}
