use std::fmt::{Display, Formatter};

use sha2::{Digest as _, Sha256};
use url::Url;

/// A repository URL normalized for comparison and cache addressing.
///
/// Normalization papers over spelling differences such as
/// `github.com/foo/bar` vs. `github.com/foo/bar.git` or a trailing slash.
/// Fetching still happens with the URL the user wrote; the canonical form is
/// only used to derive stable cache keys.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct RepositoryUrl(Url);

impl RepositoryUrl {
    pub fn parse(repo: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(&Url::parse(repo)?))
    }

    pub fn new(url: &Url) -> Self {
        let mut url = url.clone();

        // Strip a trailing slash.
        if url.path().ends_with('/') {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty();
            }
        }

        // Hosts are case-insensitive; GitHub paths effectively are too, and
        // we hash them.
        if url.host_str() == Some("github.com") {
            let path = url.path().to_lowercase();
            url.set_path(&path);
        }

        // Repos can generally be accessed with or without the `.git`
        // extension.
        let needs_chopping = std::path::Path::new(url.path())
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("git"));
        if needs_chopping {
            let last = url
                .path_segments()
                .and_then(|segments| segments.last())
                .map(|last| last[..last.len() - 4].to_owned());
            if let Some(last) = last {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop().push(&last);
                }
            }
        }

        Self(url)
    }

    /// The directory-name stem for cache entries of this repository: the last
    /// path segment plus a short hash of the canonical URL, so that forks
    /// with the same name land in distinct entries.
    pub fn slug(&self) -> String {
        let name = self
            .0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("repo");
        format!("{name}-{}", &self.short_digest())
    }

    /// The first eight hex characters of the canonical URL's SHA-256.
    fn short_digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_str().as_bytes()))[..8].to_string()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl Display for RepositoryUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::RepositoryUrl;

    #[test]
    fn git_suffix_and_trailing_slash_normalize() {
        let a = RepositoryUrl::parse("https://github.com/acme/engine.git").unwrap();
        let b = RepositoryUrl::parse("https://github.com/acme/engine/").unwrap();
        let c = RepositoryUrl::parse("https://github.com/ACME/Engine").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.slug(), b.slug());
    }

    #[test]
    fn forks_get_distinct_slugs() {
        let upstream = RepositoryUrl::parse("https://github.com/acme/engine").unwrap();
        let fork = RepositoryUrl::parse("https://github.com/rival/engine").unwrap();
        assert!(upstream.slug().starts_with("engine-"));
        assert!(fork.slug().starts_with("engine-"));
        assert_ne!(upstream.slug(), fork.slug());
    }

    #[test]
    fn slug_is_stable() {
        let url = RepositoryUrl::parse("https://example.com/group/nodes.git").unwrap();
        assert_eq!(url.slug(), RepositoryUrl::parse("https://example.com/group/nodes").unwrap().slug());
    }
}
