use std::path::{Path, PathBuf};

/// The on-disk layout of one realized version.
///
/// Everything lives under `root`; the models tree may be redirected (the
/// `MODELS_DIR` override), in which case projections land there while the
/// rest of the layout stays put.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    models_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let models_dir = root.join("models");
        Self { root, models_dir }
    }

    #[must_use]
    pub fn with_models_dir(mut self, models_dir: Option<PathBuf>) -> Self {
        if let Some(models_dir) = models_dir {
            self.models_dir = models_dir;
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The engine tree projection.
    pub fn engine_dir(&self) -> PathBuf {
        self.root.join("engine")
    }

    pub fn custom_nodes_dir(&self) -> PathBuf {
        self.root.join("custom_nodes")
    }

    pub fn extension_dir(&self, name: &str) -> PathBuf {
        self.custom_nodes_dir().join(name)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_target(&self, target_path: &str) -> PathBuf {
        self.models_dir.join(target_path)
    }

    /// Per-request staged inputs land here.
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    /// The engine writes artifacts here.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join(".venv")
    }

    /// The environment's interpreter.
    pub fn venv_python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("python.exe")
        } else {
            self.venv_dir().join("bin").join("python")
        }
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(".env_marker")
    }

    pub fn model_paths_config(&self) -> PathBuf {
        self.root.join("extra_model_paths.yaml")
    }
}
