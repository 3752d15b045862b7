use std::path::PathBuf;

use url::Url;

use crate::error::FetchError;

/// Where model-hub downloads resolve to.
const HUB_HOST: &str = "https://huggingface.co";
/// Where marketplace downloads resolve to.
const MARKET_HOST: &str = "https://civitai.com";
/// The default hub revision when none is pinned.
const HUB_DEFAULT_REVISION: &str = "main";

/// A parsed fetch source, one arm per supported scheme.
///
/// New schemes are added by extending this variant and the match arms in the
/// fetcher's dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    /// `http://` / `https://`: a direct streaming GET.
    Http { url: Url },
    /// `file://` or a bare path: a local copy.
    File { path: PathBuf },
    /// `gs://bucket/key`: cloud object store.
    ObjectStore { bucket: String, key: String },
    /// `hub://org/repo[@rev]/path` (alias `huggingface://`): a model-hub file
    /// at an optionally pinned revision.
    Hub {
        org: String,
        repo: String,
        revision: String,
        path: String,
    },
    /// `market://models/<id>` or `market://api/download/models/<id>`:
    /// an API-token-gated marketplace download.
    Market { model_id: String },
}

impl FetchSource {
    /// Parse a source URI.
    pub fn parse(uri: &str) -> Result<Self, FetchError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(FetchError::InvalidSource {
                uri: uri.to_string(),
                reason: "empty source".to_string(),
            });
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            let url = Url::parse(uri).map_err(|err| FetchError::InvalidSource {
                uri: uri.to_string(),
                reason: err.to_string(),
            })?;
            return Ok(Self::Http { url });
        }

        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(Self::File {
                path: PathBuf::from(rest),
            });
        }

        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(|| FetchError::InvalidSource {
                uri: uri.to_string(),
                reason: "expected gs://<bucket>/<key>".to_string(),
            })?;
            if bucket.is_empty() || key.is_empty() {
                return Err(FetchError::InvalidSource {
                    uri: uri.to_string(),
                    reason: "expected gs://<bucket>/<key>".to_string(),
                });
            }
            return Ok(Self::ObjectStore {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        // `huggingface://` is the long alias of `hub://`.
        if let Some(rest) = uri
            .strip_prefix("hub://")
            .or_else(|| uri.strip_prefix("huggingface://"))
        {
            return Self::parse_hub(uri, rest);
        }

        if let Some(rest) = uri.strip_prefix("market://") {
            let model_id = rest
                .strip_prefix("models/")
                .or_else(|| rest.strip_prefix("api/download/models/"))
                .ok_or_else(|| FetchError::InvalidSource {
                    uri: uri.to_string(),
                    reason: "expected market://models/<id>".to_string(),
                })?;
            let model_id = model_id.trim_end_matches('/');
            if model_id.is_empty() || !model_id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FetchError::InvalidSource {
                    uri: uri.to_string(),
                    reason: "marketplace model ids are numeric".to_string(),
                });
            }
            return Ok(Self::Market {
                model_id: model_id.to_string(),
            });
        }

        if uri.contains("://") {
            return Err(FetchError::UnsupportedScheme {
                uri: uri.to_string(),
            });
        }

        // A bare path.
        Ok(Self::File {
            path: PathBuf::from(uri),
        })
    }

    fn parse_hub(uri: &str, rest: &str) -> Result<Self, FetchError> {
        let invalid = |reason: &str| FetchError::InvalidSource {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        let mut segments = rest.splitn(3, '/');
        let org = segments.next().filter(|s| !s.is_empty());
        let repo_at = segments.next().filter(|s| !s.is_empty());
        let path = segments.next().filter(|s| !s.is_empty());
        let (Some(org), Some(repo_at), Some(path)) = (org, repo_at, path) else {
            return Err(invalid("expected hub://<org>/<repo>[@rev]/<path>"));
        };
        let (repo, revision) = match repo_at.split_once('@') {
            Some((repo, revision)) if !repo.is_empty() && !revision.is_empty() => {
                (repo, revision)
            }
            Some(_) => return Err(invalid("empty repo or revision")),
            None => (repo_at, HUB_DEFAULT_REVISION),
        };
        Ok(Self::Hub {
            org: org.to_string(),
            repo: repo.to_string(),
            revision: revision.to_string(),
            path: path.to_string(),
        })
    }

    /// The HTTPS URL this source downloads from, if it is HTTP-based.
    pub fn download_url(&self) -> Option<Url> {
        match self {
            Self::Http { url } => Some(url.clone()),
            Self::Hub {
                org,
                repo,
                revision,
                path,
            } => Url::parse(&format!(
                "{HUB_HOST}/{org}/{repo}/resolve/{revision}/{path}"
            ))
            .ok(),
            Self::Market { model_id } => {
                Url::parse(&format!("{MARKET_HOST}/api/download/models/{model_id}")).ok()
            }
            Self::File { .. } | Self::ObjectStore { .. } => None,
        }
    }

    /// The canonical form hashed into the degenerate cache key when no
    /// checksum is declared. Aliases and implicit defaults collapse here, so
    /// identical sources share a cache entry across specs.
    pub fn canonical(&self) -> String {
        match self {
            Self::Http { url } => url.to_string(),
            Self::File { path } => format!("file://{}", path.display()),
            Self::ObjectStore { bucket, key } => format!("gs://{bucket}/{key}"),
            Self::Hub {
                org,
                repo,
                revision,
                path,
            } => format!("hub://{org}/{repo}@{revision}/{path}"),
            Self::Market { model_id } => format!("market://models/{model_id}"),
        }
    }

    /// A filename derived from the URI tail, used when the spec gives no
    /// `name`.
    pub fn name_hint(&self) -> String {
        let tail = |s: &str| {
            s.rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or("model")
                .to_string()
        };
        match self {
            Self::Http { url } => tail(url.path()),
            Self::File { path } => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("model")
                .to_string(),
            Self::ObjectStore { key, .. } => tail(key),
            Self::Hub { path, .. } => tail(path),
            Self::Market { model_id } => model_id.clone(),
        }
    }
}
