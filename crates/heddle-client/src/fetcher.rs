use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{ClientBuilder, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use sha2::Digest as _;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use heddle_cache::{Cache, Sentinel};
use heddle_types::{Digest, DigestAlgorithm};

use crate::error::FetchError;
use crate::source::FetchSource;

/// How long a caller waits for a concurrent download of the same blob.
/// Model blobs run to tens of gigabytes.
const DOWNLOAD_WAIT: Duration = Duration::from_secs(3600);

/// A builder for a [`Fetcher`].
#[derive(Debug)]
pub struct FetcherBuilder {
    cache: Cache,
    offline: bool,
    retries: u32,
    timeout: Duration,
    connect_timeout: Duration,
    hub_token: Option<String>,
    market_token: Option<String>,
    object_store_cli: PathBuf,
}

impl FetcherBuilder {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            offline: false,
            retries: 3,
            timeout: Duration::from_secs(60 * 30),
            connect_timeout: Duration::from_secs(30),
            hub_token: None,
            market_token: None,
            object_store_cli: PathBuf::from("gsutil"),
        }
    }

    #[must_use]
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Per-attempt timeout for a whole response.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub fn hub_token(mut self, token: Option<String>) -> Self {
        self.hub_token = token;
        self
    }

    #[must_use]
    pub fn market_token(mut self, token: Option<String>) -> Self {
        self.market_token = token;
        self
    }

    /// Override the object-store CLI binary (tests point this at a stub).
    #[must_use]
    pub fn object_store_cli(mut self, cli: impl Into<PathBuf>) -> Self {
        self.object_store_cli = cli.into();
        self
    }

    pub fn build(self) -> Fetcher {
        let client_raw = ClientBuilder::new()
            .user_agent("heddle")
            .pool_max_idle_per_host(20)
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .build()
            .expect("Failed to build HTTP client");

        // Transient failures (connect errors, 5xx) retry with exponential
        // backoff from half a second; terminal statuses do not.
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(30))
            .build_with_max_retries(self.retries);
        let client = reqwest_middleware::ClientBuilder::new(client_raw)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Fetcher {
            cache: self.cache,
            client,
            offline: self.offline,
            hub_token: self.hub_token,
            market_token: self.market_token,
            object_store_cli: self.object_store_cli,
        }
    }
}

/// Delivers local paths for source URIs, backed by the content-addressed
/// model store.
#[derive(Debug, Clone)]
pub struct Fetcher {
    cache: Cache,
    client: ClientWithMiddleware,
    offline: bool,
    hub_token: Option<String>,
    market_token: Option<String>,
    object_store_cli: PathBuf,
}

impl Fetcher {
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The cache key a source resolves to: the declared checksum, or the
    /// SHA-256 of the canonicalized URI when none is declared.
    pub fn cache_key(source: &FetchSource, checksum: Option<&Digest>) -> Digest {
        checksum
            .cloned()
            .unwrap_or_else(|| Digest::sha256(source.canonical().as_bytes()))
    }

    /// Whether the blob for `uri` is already cached.
    pub fn is_cached(&self, uri: &str, checksum: Option<&Digest>) -> Result<bool, FetchError> {
        let source = FetchSource::parse(uri)?;
        Ok(self
            .cache
            .model_blob(&Self::cache_key(&source, checksum))
            .is_file())
    }

    /// Deliver a local path whose contents come from `uri` and, when given,
    /// match `checksum`. Concurrent calls for the same key collapse onto a
    /// single download.
    #[instrument(skip(self, checksum), level = "debug")]
    pub async fn fetch(
        &self,
        uri: &str,
        checksum: Option<&Digest>,
    ) -> Result<PathBuf, FetchError> {
        let source = FetchSource::parse(uri)?;
        let key = Self::cache_key(&source, checksum);
        let blob = self.cache.model_blob(&key);

        if blob.is_file() {
            debug!("Cache hit for `{uri}` at {}", blob.display());
            return Ok(blob);
        }
        if self.offline {
            return Err(FetchError::OfflineUnavailable {
                uri: uri.to_string(),
            });
        }

        let entry_dir = blob
            .parent()
            .expect("blob paths always have a parent")
            .to_path_buf();
        let sentinel = Sentinel::acquire(entry_dir.join(".lock"), DOWNLOAD_WAIT).await?;

        // A concurrent fetch may have published while we waited.
        if blob.is_file() {
            sentinel.release()?;
            return Ok(blob);
        }

        let result = self.download(&source, uri, checksum, &blob).await;
        sentinel.release()?;
        result?;
        Ok(blob)
    }

    /// Download into a temporary sibling, verify, then publish atomically.
    async fn download(
        &self,
        source: &FetchSource,
        uri: &str,
        checksum: Option<&Digest>,
        blob: &Path,
    ) -> Result<(), FetchError> {
        let entry_dir = blob.parent().expect("blob paths always have a parent");
        fs_err::create_dir_all(entry_dir)?;
        let tmp = entry_dir.join(format!(
            "blob.tmp.{}.{:08x}",
            std::process::id(),
            fastrand::u32(..),
        ));

        let algorithm = checksum.map_or(DigestAlgorithm::Sha256, Digest::algorithm);
        let outcome: Result<Digest, FetchError> = match source {
            FetchSource::Http { .. } | FetchSource::Hub { .. } | FetchSource::Market { .. } => {
                self.download_http(source, uri, algorithm, &tmp).await
            }
            FetchSource::File { path } => copy_local(path, algorithm, &tmp).await,
            FetchSource::ObjectStore { bucket, key } => {
                self.download_object_store(bucket, key, algorithm, &tmp)
                    .await
            }
        };

        let actual = match outcome {
            Ok(actual) => actual,
            Err(err) => {
                let _ = fs_err::remove_file(&tmp);
                return Err(err);
            }
        };

        if let Some(expected) = checksum {
            if *expected != actual {
                // The blob is never published under a key it does not hash to.
                let _ = fs_err::remove_file(&tmp);
                return Err(FetchError::Integrity {
                    uri: uri.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        fs_err::rename(&tmp, blob)?;
        debug!("Published `{uri}` as {}", blob.display());
        Ok(())
    }

    async fn download_http(
        &self,
        source: &FetchSource,
        uri: &str,
        algorithm: DigestAlgorithm,
        tmp: &Path,
    ) -> Result<Digest, FetchError> {
        let url = source
            .download_url()
            .expect("HTTP-based sources have a download URL");
        let mut request = self.client.get(url);
        let token = match source {
            FetchSource::Hub { .. } => self.hub_token.as_deref(),
            FetchSource::Market { .. } => self.market_token.as_deref(),
            _ => None,
        };
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Auth {
                    uri: uri.to_string(),
                    status: response.status().as_u16(),
                });
            }
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    uri: uri.to_string(),
                });
            }
            status => {
                return Err(FetchError::Status {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                });
            }
        }

        let mut hasher = Hasher::new(algorithm);
        let mut file = tokio::fs::File::create(tmp).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::from)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(hasher.finalize())
    }

    async fn download_object_store(
        &self,
        bucket: &str,
        key: &str,
        algorithm: DigestAlgorithm,
        tmp: &Path,
    ) -> Result<Digest, FetchError> {
        let dest = tmp.to_str().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "non-UTF-8 cache path")
        })?;
        let source = format!("gs://{bucket}/{key}");
        let output = tokio::process::Command::new(&self.object_store_cli)
            .args(["-q", "cp", source.as_str(), dest])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.contains("403") || stderr.contains("AccessDenied") || stderr.contains("401")
            {
                return Err(FetchError::Auth {
                    uri: format!("gs://{bucket}/{key}"),
                    status: 403,
                });
            }
            return Err(FetchError::VendorCli {
                tool: "gsutil",
                stderr,
            });
        }
        hash_file(tmp, algorithm).await
    }
}

/// An incremental hasher over the algorithm of the declared checksum.
enum Hasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(bytes),
            Self::Sha512(hasher) => hasher.update(bytes),
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Self::Sha256(hasher) => {
                Digest::new(DigestAlgorithm::Sha256, hex::encode(hasher.finalize()))
                    .expect("sha256 output is valid hex")
            }
            Self::Sha512(hasher) => {
                Digest::new(DigestAlgorithm::Sha512, hex::encode(hasher.finalize()))
                    .expect("sha512 output is valid hex")
            }
        }
    }
}

async fn copy_local(
    path: &Path,
    algorithm: DigestAlgorithm,
    tmp: &Path,
) -> Result<Digest, FetchError> {
    if !path.is_file() {
        return Err(FetchError::LocalMissing {
            path: path.to_path_buf(),
        });
    }
    let mut reader = tokio::fs::File::open(path).await?;
    let mut file = tokio::fs::File::create(tmp).await?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        file.write_all(&buf[..read]).await?;
    }
    file.sync_all().await?;
    Ok(hasher.finalize())
}

async fn hash_file(path: &Path, algorithm: DigestAlgorithm) -> Result<Digest, FetchError> {
    let mut reader = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}
