use std::io;
use std::path::PathBuf;

use thiserror::Error;

use heddle_cache::SentinelError;
use heddle_types::{Digest, ErrorKind};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid source `{uri}`: {reason}")]
    InvalidSource { uri: String, reason: String },

    #[error("Unsupported scheme in `{uri}`")]
    UnsupportedScheme { uri: String },

    #[error("Checksum mismatch for `{uri}`: expected {expected}, got {actual}")]
    Integrity {
        uri: String,
        expected: Digest,
        actual: Digest,
    },

    #[error("`{uri}` requires credentials (HTTP {status}); set the token environment variable")]
    Auth { uri: String, status: u16 },

    #[error("`{uri}` was not found (HTTP 404)")]
    NotFound { uri: String },

    #[error("Request for `{uri}` failed with HTTP {status}")]
    Status { uri: String, status: u16 },

    #[error("Local source `{}` does not exist", .path.display())]
    LocalMissing { path: PathBuf },

    #[error("Offline mode: `{uri}` is not in the cache")]
    OfflineUnavailable { uri: String },

    #[error("`{tool}` failed:\n{stderr}")]
    VendorCli { tool: &'static str, stderr: String },

    /// A transport failure that survived the retry policy.
    #[error(transparent)]
    Request(#[from] reqwest_middleware::Error),

    #[error(transparent)]
    Sentinel(#[from] SentinelError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(reqwest_middleware::Error::Reqwest(err))
    }
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSource { .. } | Self::UnsupportedScheme { .. } => ErrorKind::Validation,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::OfflineUnavailable { .. } => ErrorKind::OfflineUnavailable,
            Self::NotFound { .. }
            | Self::Status { .. }
            | Self::Request(_)
            | Self::VendorCli { .. } => ErrorKind::Network,
            Self::LocalMissing { .. } => ErrorKind::Validation,
            Self::Sentinel(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload of `{key}` to `{bucket}` failed after {attempts} attempts:\n{stderr}")]
    Exhausted {
        bucket: String,
        key: String,
        attempts: u32,
        stderr: String,
    },

    #[error("Uploaded object `gs://{bucket}/{key}` failed post-upload validation")]
    Validation { bucket: String, key: String },

    #[error("No object bucket configured; set OBJECT_BUCKET or pass `object_bucket`")]
    MissingBucket,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBucket => ErrorKind::Usage,
            Self::Exhausted { .. } | Self::Validation { .. } | Self::Io(_) => ErrorKind::Upload,
        }
    }
}
