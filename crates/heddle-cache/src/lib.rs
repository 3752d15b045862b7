use std::fmt::{Display, Formatter};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;

use heddle_types::{Digest, VersionId};

pub use canonical_url::RepositoryUrl;
pub use projection::{project, ProjectionError};
pub use sentinel::{Sentinel, SentinelError};

mod canonical_url;
mod projection;
mod sentinel;

/// The shared store underneath `$CACHE_ROOT`.
///
/// Entries are content-addressed and immutable once published: writers stage
/// siblings and atomically rename, readers only ever see complete entries.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open (and if necessary initialize) a cache at `root`.
    pub fn from_path(root: impl Into<PathBuf>) -> Result<Self, io::Error> {
        Ok(Self {
            root: Self::init(root.into())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder for a cache bucket.
    pub fn bucket(&self, bucket: CacheBucket) -> PathBuf {
        self.root.join(bucket.to_str())
    }

    /// The directory holding a clean checkout of `repo` at `commit`.
    pub fn source_entry(&self, repo: &RepositoryUrl, commit: &str) -> PathBuf {
        self.bucket(CacheBucket::Sources)
            .join(format!("{}@{commit}", repo.slug()))
    }

    /// The blob file for a model addressed by `digest`.
    ///
    /// Layout: `models/<algo>/<hh>/<hex>/blob`, with `<hh>` the first two hex
    /// characters, to keep directory fanout bounded.
    pub fn model_blob(&self, digest: &Digest) -> PathBuf {
        let hex = digest.hex();
        self.bucket(CacheBucket::Models)
            .join(digest.algorithm().as_str())
            .join(&hex[..2])
            .join(hex)
            .join("blob")
    }

    /// The resolved lock file for a version.
    pub fn resolved_lock(&self, version_id: &VersionId) -> PathBuf {
        self.bucket(CacheBucket::Resolved)
            .join(format!("{version_id}.lock"))
    }

    /// Initialize a directory for use as a cache.
    fn init(root: PathBuf) -> Result<PathBuf, io::Error> {
        fs::create_dir_all(&root)?;

        // Add the CACHEDIR.TAG.
        cachedir::ensure_tag(&root)?;

        // Add the .gitignore.
        let gitignore_path = root.join(".gitignore");
        if !gitignore_path.exists() {
            let mut file = fs::File::create(gitignore_path)?;
            file.write_all(b"*")?;
        }

        fs::canonicalize(root)
    }
}

/// The kinds of data in the cache, each a subdirectory of the cache root.
///
/// The names are part of the on-disk contract shared with sibling worker
/// processes; they carry no version suffix.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CacheBucket {
    /// Clean checkouts, one directory per `<slug>@<commit>`.
    Sources,
    /// Content-addressed model blobs.
    Models,
    /// Resolved lock files, one per version id.
    Resolved,
}

impl CacheBucket {
    fn to_str(self) -> &'static str {
        match self {
            CacheBucket::Sources => "sources",
            CacheBucket::Models => "models",
            CacheBucket::Resolved => "resolved",
        }
    }
}

impl Display for CacheBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use heddle_types::Digest;

    use super::{Cache, RepositoryUrl};

    #[test]
    fn init_writes_cache_markers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path().join("cache")).unwrap();
        assert!(cache.root().join("CACHEDIR.TAG").is_file());
        assert!(cache.root().join(".gitignore").is_file());
    }

    #[test]
    fn model_blob_layout_is_sharded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path()).unwrap();
        let digest = Digest::from_str(&format!("sha256:ab{}", "cd".repeat(31))).unwrap();
        let path = cache.model_blob(&digest);
        let rel = path.strip_prefix(cache.root()).unwrap();
        let mut parts = rel.components().map(|c| c.as_os_str().to_str().unwrap());
        assert_eq!(parts.next(), Some("models"));
        assert_eq!(parts.next(), Some("sha256"));
        assert_eq!(parts.next(), Some("ab"));
        assert_eq!(parts.next(), Some(digest.hex()));
        assert_eq!(parts.next(), Some("blob"));
    }

    #[test]
    fn source_entry_combines_slug_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path()).unwrap();
        let repo = RepositoryUrl::parse("https://github.com/acme/engine.git").unwrap();
        let entry = cache.source_entry(&repo, "0123abcd");
        let name = entry.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("engine-"));
        assert!(name.ends_with("@0123abcd"));
    }
}
