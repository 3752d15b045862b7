use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;
use url::Url;

use heddle_config::Config;
use heddle_git::looks_like_commit;
use heddle_spec::{validate_spec, ModelEntry, SourcePin, VersionSpec, SCHEMA_VERSION};
use heddle_types::VersionId;

use crate::commands::{spec_path, CliError, ExitStatus};
use crate::printer::Printer;

/// Build and write a version spec from CLI arguments.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create(
    config: &Config,
    version_id: &str,
    engine: &str,
    extensions: &[String],
    models: &[String],
    packages: &[String],
    force: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let spec = VersionSpec {
        schema_version: SCHEMA_VERSION,
        version_id: version_id.clone(),
        engine_source: parse_source(engine)?,
        extensions: extensions
            .iter()
            .map(|extension| parse_source(extension))
            .collect::<Result<_>>()?,
        models: models
            .iter()
            .map(|model| parse_model(model))
            .collect::<Result<_>>()?,
        extra_packages: packages.to_vec(),
        env: std::collections::BTreeMap::new(),
        options: heddle_spec::SpecOptions::default(),
    };
    validate_spec(&spec)?;

    let path = spec_path(config, &version_id);
    // Specs are frozen once written.
    if path.exists() && !force {
        return Err(CliError::usage(format!(
            "spec `{}` already exists (pass --force to overwrite it)",
            path.display()
        )));
    }
    spec.save(&path)?;
    writeln!(
        printer,
        "Wrote spec for {} to {}",
        version_id,
        format!("{}", path.display()).cyan()
    )?;
    Ok(ExitStatus::Success)
}

/// Parse `URL[@ref]`; a full hash after `@` pins a commit, anything else is a
/// symbolic ref, and no `@` means the remote HEAD.
fn parse_source(raw: &str) -> Result<SourcePin> {
    let (repo, reference) = match raw.rsplit_once('@') {
        // `@` inside the URL itself (userinfo, paths) is not a ref split.
        Some((repo, reference))
            if !reference.is_empty() && !reference.contains('/') && repo.contains("://") =>
        {
            (repo, Some(reference.to_string()))
        }
        _ => (raw, None),
    };
    let repo = Url::parse(repo)
        .map_err(|err| CliError::usage(format!("invalid repository URL `{repo}`: {err}")))?;
    let (reference, commit) = match reference {
        Some(reference) if looks_like_commit(&reference) => (None, Some(reference)),
        Some(reference) => (Some(reference), None),
        None => (Some("HEAD".to_string()), None),
    };
    Ok(SourcePin {
        name: None,
        repo,
        reference,
        commit,
    })
}

/// Parse `URI[::subdir[::checksum]]`; the subdir defaults to `checkpoints`.
fn parse_model(raw: &str) -> Result<ModelEntry> {
    let mut parts = raw.splitn(3, "::");
    let source = parts
        .next()
        .filter(|source| !source.is_empty())
        .ok_or_else(|| CliError::usage(format!("empty model source in `{raw}`")))?;
    let target_subdir = parts.next().unwrap_or("checkpoints");
    let checksum = parts
        .next()
        .map(|checksum| {
            checksum
                .parse()
                .map_err(|err| CliError::usage(format!("invalid checksum in `{raw}`: {err}")))
        })
        .transpose()?;
    Ok(ModelEntry {
        source: source.to_string(),
        name: None,
        target_subdir: Some(target_subdir.to_string()),
        target_path: None,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_model, parse_source};

    #[test]
    fn sources_split_refs_and_commits() {
        let head = parse_source("https://github.com/acme/engine").unwrap();
        assert_eq!(head.reference.as_deref(), Some("HEAD"));

        let branch = parse_source("https://github.com/acme/engine@release").unwrap();
        assert_eq!(branch.reference.as_deref(), Some("release"));
        assert!(branch.commit.is_none());

        let commit = "0123456789012345678901234567890123456789";
        let pinned = parse_source(&format!("https://github.com/acme/engine@{commit}")).unwrap();
        assert_eq!(pinned.commit.as_deref(), Some(commit));
        assert!(pinned.reference.is_none());
    }

    #[test]
    fn models_split_subdir_and_checksum() {
        let plain = parse_model("https://example.com/a.safetensors").unwrap();
        assert_eq!(plain.target_subdir.as_deref(), Some("checkpoints"));

        let with_subdir = parse_model("hub://org/repo/vae.bin::vae").unwrap();
        assert_eq!(with_subdir.target_subdir.as_deref(), Some("vae"));

        let digest = format!("sha256:{}", "ab".repeat(32));
        let with_checksum =
            parse_model(&format!("https://example.com/a.bin::unet::{digest}")).unwrap();
        assert_eq!(with_checksum.checksum.unwrap().to_string(), digest);

        assert!(parse_model("https://example.com/a.bin::unet::sha256:xyz").is_err());
    }
}
