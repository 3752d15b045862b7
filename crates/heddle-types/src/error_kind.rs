use std::fmt::{Display, Formatter};

/// Stable failure classification, usable in logs, machine responses and exit
/// codes.
///
/// The tokens are part of the external contract: the CLI prints them in its
/// terminal error line, and the job handler returns them in the structured
/// error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad CLI arguments or a malformed job payload.
    Usage,
    /// A spec failed schema or safety checks.
    Validation,
    /// Offline mode requires data that is not in the cache.
    OfflineUnavailable,
    /// A network failure that persisted after retries.
    Network,
    /// A checksum mismatch.
    Integrity,
    /// The remote rejected our credentials (401/403).
    Auth,
    /// A failure while materializing a version on disk.
    Realization,
    /// A package install failure.
    EnvBuild,
    /// The engine did not become ready before the timeout.
    EngineStart,
    /// The engine reported a graph failure or crashed.
    EngineExec,
    /// The uploader failed after retries.
    Upload,
    /// Unclassified.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Validation => "validation",
            Self::OfflineUnavailable => "offline_unavailable",
            Self::Network => "network",
            Self::Integrity => "integrity",
            Self::Auth => "auth",
            Self::Realization => "realization",
            Self::EnvBuild => "env_build",
            Self::EngineStart => "engine_start",
            Self::EngineExec => "engine_exec",
            Self::Upload => "upload",
            Self::Internal => "internal",
        }
    }

    /// The process exit code the CLI reports for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Usage => 2,
            Self::Validation => 3,
            Self::Realization | Self::EnvBuild => 4,
            Self::EngineStart | Self::EngineExec | Self::Upload => 5,
            Self::Integrity => 6,
            Self::OfflineUnavailable => 7,
            Self::Network | Self::Auth | Self::Internal => 1,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usage" => Ok(Self::Usage),
            "validation" => Ok(Self::Validation),
            "offline_unavailable" => Ok(Self::OfflineUnavailable),
            "network" => Ok(Self::Network),
            "integrity" => Ok(Self::Integrity),
            "auth" => Ok(Self::Auth),
            "realization" => Ok(Self::Realization),
            "env_build" => Ok(Self::EnvBuild),
            "engine_start" => Ok(Self::EngineStart),
            "engine_exec" => Ok(Self::EngineExec),
            "upload" => Ok(Self::Upload),
            "internal" => Ok(Self::Internal),
            other => Err(format!("unknown error kind `{other}`")),
        }
    }
}
