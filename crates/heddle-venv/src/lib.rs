//! Isolated interpreter environments.
//!
//! Each workspace carries its own `.venv`; the engine's requirements, each
//! extension's requirements and the spec's extra packages install into it in
//! that order, so later entries may override earlier ones. The package
//! manager runs as a subprocess.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tracing::{debug, info, instrument};

use heddle_types::ErrorKind;

pub use interpreter::find_python;
pub use paths_config::write_model_paths_config;

mod interpreter;
mod paths_config;

#[derive(Debug, Error)]
pub enum VenvError {
    #[error("Failed to find a usable Python interpreter: {0}")]
    NoInterpreter(String),

    #[error("The directory {} exists but is not a virtual environment", .0.display())]
    NotAVenv(PathBuf),

    #[error("Failed to create the virtual environment:\n{stderr}")]
    Create { stderr: String },

    #[error("Failed to install {what}:\n{stderr}")]
    Install { what: String, stderr: String },

    #[error("Offline mode: {what} is not available from the wheel directory")]
    OfflineWheels { what: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VenvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OfflineWheels { .. } => ErrorKind::OfflineUnavailable,
            Self::NoInterpreter(_) | Self::NotAVenv(_) | Self::Create { .. } | Self::Install { .. } => {
                ErrorKind::EnvBuild
            }
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// One pip invocation of the ordered install plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Install {
    /// What is being installed, for errors and logs.
    pub what: String,
    /// Arguments after `pip install`.
    pub args: Vec<String>,
}

/// Compute the ordered installs: core requirements, each extension's
/// requirements in spec order, then the extra packages. Requirement files
/// that do not exist are skipped.
pub fn install_plan(
    engine_tree: &Path,
    extensions: &[(String, PathBuf)],
    extra_packages: &[String],
) -> Vec<Install> {
    let mut plan = Vec::new();
    let requirements = engine_tree.join("requirements.txt");
    if requirements.is_file() {
        plan.push(Install {
            what: "engine requirements".to_string(),
            args: vec!["-r".to_string(), requirements.display().to_string()],
        });
    }
    for (name, tree) in extensions {
        let requirements = tree.join("requirements.txt");
        if requirements.is_file() {
            plan.push(Install {
                what: format!("requirements of `{name}`"),
                args: vec!["-r".to_string(), requirements.display().to_string()],
            });
        }
    }
    if !extra_packages.is_empty() {
        plan.push(Install {
            what: "extra packages".to_string(),
            args: extra_packages.to_vec(),
        });
    }
    plan
}

/// Creates and populates a workspace's `.venv`.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    workspace: PathBuf,
    python: Option<PathBuf>,
    wheels_dir: Option<PathBuf>,
    offline: bool,
}

impl EnvironmentBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            python: None,
            wheels_dir: None,
            offline: false,
        }
    }

    #[must_use]
    pub fn python(mut self, python: Option<PathBuf>) -> Self {
        self.python = python;
        self
    }

    /// A directory of pre-built wheels; installs become `--no-index
    /// --find-links <dir>`.
    #[must_use]
    pub fn wheels_dir(mut self, wheels_dir: Option<PathBuf>) -> Self {
        self.wheels_dir = wheels_dir;
        self
    }

    #[must_use]
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.workspace.join(".venv")
    }

    /// The environment's interpreter.
    pub fn venv_python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("python.exe")
        } else {
            self.venv_dir().join("bin").join("python")
        }
    }

    /// Create the venv if needed, then run the ordered installs.
    #[instrument(skip_all, fields(workspace = %self.workspace.display()))]
    pub async fn ensure(
        &self,
        engine_tree: &Path,
        extensions: &[(String, PathBuf)],
        extra_packages: &[String],
    ) -> Result<(), VenvError> {
        self.create_venv().await?;
        for install in install_plan(engine_tree, extensions, extra_packages) {
            self.pip_install(&install).await?;
        }
        Ok(())
    }

    async fn create_venv(&self) -> Result<(), VenvError> {
        let venv = self.venv_dir();
        if venv.exists() {
            if venv.join("pyvenv.cfg").is_file() {
                debug!("Reusing virtual environment at {}", venv.display());
                return Ok(());
            }
            return Err(VenvError::NotAVenv(venv));
        }

        let python = interpreter::find_python(self.python.as_deref())?;
        info!("Creating virtual environment at {}", venv.display());
        let output = tokio::process::Command::new(&python)
            .args(["-m", "venv"])
            .arg(&venv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(VenvError::Create {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn pip_install(&self, install: &Install) -> Result<(), VenvError> {
        let mut command = tokio::process::Command::new(self.venv_python());
        command.args(["-m", "pip", "install", "--no-input"]);
        if let Some(wheels) = &self.wheels_dir {
            command.arg("--no-index").arg("--find-links").arg(wheels);
        } else if self.offline {
            // No wheel directory: only pip's own cache can satisfy this.
            command.arg("--no-index");
        }
        command
            .args(&install.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!("Installing {}", install.what);
        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if (self.wheels_dir.is_some() || self.offline)
                && stderr.contains("No matching distribution")
            {
                return Err(VenvError::OfflineWheels {
                    what: install.what.clone(),
                });
            }
            return Err(VenvError::Install {
                what: install.what.clone(),
                stderr,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::install_plan;

    #[test]
    fn plan_orders_core_extensions_extras() {
        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("engine");
        fs_err::create_dir_all(&engine).unwrap();
        fs_err::write(engine.join("requirements.txt"), "torch\n").unwrap();

        let with_reqs = dir.path().join("control-nodes");
        fs_err::create_dir_all(&with_reqs).unwrap();
        fs_err::write(with_reqs.join("requirements.txt"), "opencv-python\n").unwrap();
        let without_reqs = dir.path().join("plain-nodes");
        fs_err::create_dir_all(&without_reqs).unwrap();

        let extensions = vec![
            ("control-nodes".to_string(), with_reqs.clone()),
            ("plain-nodes".to_string(), without_reqs),
        ];
        let extras = vec!["pillow==10.0.0".to_string(), "numpy".to_string()];
        let plan = install_plan(&engine, &extensions, &extras);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].what, "engine requirements");
        assert_eq!(plan[1].what, "requirements of `control-nodes`");
        // Extras install last so they may override pinned requirements.
        assert_eq!(plan[2].args, extras);
    }

    #[test]
    fn plan_is_empty_without_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("engine");
        fs_err::create_dir_all(&engine).unwrap();
        assert!(install_plan(&engine, &[], &[]).is_empty());
    }
}
