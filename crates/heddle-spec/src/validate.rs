use std::path::{Component, Path};

use heddle_git::looks_like_commit;

use crate::error::SpecError;
use crate::model::{SourcePin, VersionSpec, SCHEMA_VERSION};

/// Structural and safety validation of a spec, before any network access.
pub fn validate_spec(spec: &VersionSpec) -> Result<(), SpecError> {
    if spec.schema_version != SCHEMA_VERSION {
        return Err(SpecError::SchemaVersion {
            found: spec.schema_version,
            expected: SCHEMA_VERSION,
        });
    }

    validate_source(&spec.engine_source)?;
    for extension in &spec.extensions {
        validate_source(extension)?;
        let name = extension.effective_name();
        if !is_safe_name(&name) {
            return Err(SpecError::InvalidExtensionName { name });
        }
    }

    for model in &spec.models {
        if model.target_subdir.is_none() && model.target_path.is_none() {
            return Err(SpecError::UntargetedModel {
                source_uri: model.source.clone(),
            });
        }
        for path in [&model.target_subdir, &model.target_path]
            .into_iter()
            .flatten()
        {
            validate_relative_path(path)?;
        }
        if let Some(name) = &model.name {
            if !is_safe_name(name) {
                return Err(SpecError::UnsafePath {
                    path: name.clone(),
                    reason: "model names may not contain separators",
                });
            }
        }
    }

    for name in spec.env.keys() {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(SpecError::InvalidEnvName { name: name.clone() });
        }
    }

    Ok(())
}

fn validate_source(source: &SourcePin) -> Result<(), SpecError> {
    if source.reference.is_none() && source.commit.is_none() {
        return Err(SpecError::UnpinnedSource {
            repo: source.repo.to_string(),
        });
    }
    if let Some(commit) = &source.commit {
        if !looks_like_commit(commit) {
            return Err(SpecError::MalformedCommit {
                commit: commit.clone(),
            });
        }
    }
    Ok(())
}

/// A projection target must stay inside the workspace when joined and
/// lexically cleaned; no symlink is followed here.
pub(crate) fn validate_relative_path(path: &str) -> Result<(), SpecError> {
    if path.is_empty() {
        return Err(SpecError::UnsafePath {
            path: path.to_string(),
            reason: "empty path",
        });
    }
    if path.contains('\\') {
        return Err(SpecError::UnsafePath {
            path: path.to_string(),
            reason: "backslashes are not portable",
        });
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(SpecError::UnsafePath {
                    path: path.to_string(),
                    reason: "`..` escapes the workspace",
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SpecError::UnsafePath {
                    path: path.to_string(),
                    reason: "absolute paths are not allowed",
                });
            }
        }
    }
    Ok(())
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}
