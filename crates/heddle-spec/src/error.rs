use std::io;
use std::path::PathBuf;

use thiserror::Error;

use heddle_git::GitError;
use heddle_types::ErrorKind;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Unsupported schema version {found} (this build reads version {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Source `{repo}` needs a `ref` or a `commit`")]
    UnpinnedSource { repo: String },

    #[error("`{commit}` is not a full commit hash")]
    MalformedCommit { commit: String },

    #[error("Model `{source_uri}` needs a `target_subdir` or a `target_path`")]
    UntargetedModel { source_uri: String },

    #[error("Unsafe path `{path}`: {reason}")]
    UnsafePath { path: String, reason: &'static str },

    #[error("Invalid extension name `{name}`")]
    InvalidExtensionName { name: String },

    #[error("Invalid model source `{uri}`: {reason}")]
    InvalidModelSource { uri: String, reason: String },

    #[error("Invalid environment variable name `{name}`")]
    InvalidEnvName { name: String },

    #[error("Spec file not found: {}", .0.display())]
    SpecNotFound(PathBuf),

    #[error("Failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SpecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaVersion { .. }
            | Self::UnpinnedSource { .. }
            | Self::MalformedCommit { .. }
            | Self::UntargetedModel { .. }
            | Self::UnsafePath { .. }
            | Self::InvalidExtensionName { .. }
            | Self::InvalidModelSource { .. }
            | Self::InvalidEnvName { .. }
            | Self::Parse { .. } => ErrorKind::Validation,
            Self::SpecNotFound(_) => ErrorKind::Usage,
            Self::Git(err) => err.kind(),
            Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}
