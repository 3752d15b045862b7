use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use heddle_types::{Digest, VersionId};

use crate::canonical::canonical_pretty;
use crate::error::SpecError;

/// The schema generation this build reads and writes.
pub const SCHEMA_VERSION: u32 = 2;

/// A pinned or pinnable source tree: the engine itself or one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub repo: Url,
    /// A branch, tag or other symbolic ref; resolved away by the resolver.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl SourcePin {
    /// The name this source projects under, derived from the repo when not
    /// explicit.
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

/// One model artifact to fetch and project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Digest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecOptions {
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub skip_models: bool,
}

/// A user-authored version description. Frozen once written; edits produce a
/// new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    pub schema_version: u32,
    pub version_id: VersionId,
    pub engine_source: SourcePin,
    #[serde(default)]
    pub extensions: Vec<SourcePin>,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub options: SpecOptions,
}

impl VersionSpec {
    /// Read a spec from disk.
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let contents = match fs_err::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpecError::SpecNotFound(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&contents).map_err(|source| SpecError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the spec atomically in canonical form.
    pub fn save(&self, path: &Path) -> Result<(), SpecError> {
        let contents = canonical_pretty(self)?;
        heddle_fs::write_atomic_sync(path, contents)?;
        Ok(())
    }

    /// The hex SHA-256 of the canonicalized spec; recorded in locks and
    /// workspace markers.
    pub fn digest(&self) -> Result<String, SpecError> {
        let compact = crate::canonical::canonical_compact(self)?;
        Ok(Digest::sha256(compact.as_bytes()).hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{SourcePin, VersionSpec};

    #[test]
    fn parses_a_minimal_spec() {
        let spec: VersionSpec = serde_json::from_str(indoc! {r#"
            {
              "schema_version": 2,
              "version_id": "v1",
              "engine_source": {"repo": "https://github.com/acme/engine", "ref": "master"}
            }
        "#})
        .unwrap();
        assert_eq!(spec.version_id.as_str(), "v1");
        assert_eq!(spec.engine_source.reference.as_deref(), Some("master"));
        assert!(spec.extensions.is_empty());
        assert!(spec.models.is_empty());
    }

    #[test]
    fn effective_name_strips_git_suffix() {
        let pin: SourcePin = serde_json::from_str(
            r#"{"repo": "https://github.com/acme/control-nodes.git", "ref": "main"}"#,
        )
        .unwrap();
        assert_eq!(pin.effective_name(), "control-nodes");

        let named: SourcePin = serde_json::from_str(
            r#"{"name": "controls", "repo": "https://github.com/acme/control-nodes", "ref": "main"}"#,
        )
        .unwrap();
        assert_eq!(named.effective_name(), "controls");
    }

    #[test]
    fn digest_is_stable_across_key_order() {
        let a: VersionSpec = serde_json::from_str(
            r#"{"schema_version": 2, "version_id": "v1",
                "engine_source": {"repo": "https://github.com/acme/engine", "ref": "main"}}"#,
        )
        .unwrap();
        let b: VersionSpec = serde_json::from_str(
            r#"{"version_id": "v1", "schema_version": 2,
                "engine_source": {"ref": "main", "repo": "https://github.com/acme/engine"}}"#,
        )
        .unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }
}
