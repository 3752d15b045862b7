use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// One step the realizer would take; the dry-run output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Checkout {
        repo: String,
        commit: String,
        target: PathBuf,
        cached: bool,
    },
    FetchModel {
        source: String,
        target: PathBuf,
        cached: bool,
    },
    SkipModels,
    BuildEnvironment {
        installs: usize,
        extra_packages: usize,
    },
    WriteMarker,
    UpToDate,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        matches!(self.actions.as_slice(), [PlanAction::UpToDate])
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for action in &self.actions {
            match action {
                PlanAction::Checkout {
                    repo,
                    commit,
                    target,
                    cached,
                } => {
                    let state = if *cached { "cached" } else { "clone" };
                    writeln!(
                        f,
                        "  checkout  {repo} @ {} -> {} ({state})",
                        &commit[..commit.len().min(12)],
                        target.display(),
                    )?;
                }
                PlanAction::FetchModel {
                    source,
                    target,
                    cached,
                } => {
                    let state = if *cached { "cached" } else { "fetch" };
                    writeln!(f, "  model     {source} -> {} ({state})", target.display())?;
                }
                PlanAction::SkipModels => writeln!(f, "  model     (skipped)")?,
                PlanAction::BuildEnvironment {
                    installs,
                    extra_packages,
                } => writeln!(
                    f,
                    "  env       {installs} requirement set(s), {extra_packages} extra package(s)",
                )?,
                PlanAction::WriteMarker => writeln!(f, "  marker    write")?,
                PlanAction::UpToDate => writeln!(f, "  up to date")?,
            }
        }
        Ok(())
    }
}
