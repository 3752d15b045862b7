use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use heddle_types::{Digest, VersionId};

use crate::canonical::{canonical_compact, canonical_pretty};
use crate::error::SpecError;
use crate::model::SpecOptions;

/// A source with its ref resolved away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub repo: Url,
    pub commit: String,
}

impl LockedSource {
    /// The name this source projects under.
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let tail = self
            .repo
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("extension");
        tail.strip_suffix(".git").unwrap_or(tail).to_string()
    }
}

/// A model with its name and target path made concrete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedModel {
    pub source: String,
    pub name: String,
    pub target_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Digest>,
}

/// The resolver's output: the spec with every ref pinned, plus provenance.
///
/// Written atomically; readers see either the previous or the new lock,
/// never a partial one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLock {
    pub schema_version: u32,
    pub version_id: VersionId,
    pub engine_source: LockedSource,
    #[serde(default)]
    pub extensions: Vec<LockedSource>,
    #[serde(default)]
    pub models: Vec<LockedModel>,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub options: SpecOptions,
    /// Monotonic resolution sequence; bumped only when the resolution
    /// actually changes.
    pub resolved_at: u64,
    /// Hex SHA-256 of the canonicalized source spec.
    pub spec_digest: String,
}

impl ResolvedLock {
    /// Read a lock, `None` when absent.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, SpecError> {
        let contents = match fs_err::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let lock = serde_json::from_str(&contents).map_err(|source| SpecError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(lock))
    }

    /// Write the lock atomically in canonical form.
    pub fn save(&self, path: &Path) -> Result<(), SpecError> {
        let contents = canonical_pretty(self)?;
        heddle_fs::write_atomic_sync(path, contents)?;
        Ok(())
    }

    /// Hex SHA-256 of the canonical lock; the workspace marker records it.
    pub fn digest(&self) -> Result<String, SpecError> {
        let compact = canonical_compact(self)?;
        Ok(Digest::sha256(compact.as_bytes()).hex().to_string())
    }

    /// Whether two locks pin the same content, ignoring the resolution
    /// sequence number.
    pub fn same_resolution(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.resolved_at = 0;
        b.resolved_at = 0;
        a == b
    }
}
