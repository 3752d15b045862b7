use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::UploadError;

/// Retry and delivery policy for the uploader, mirroring the fetcher's
/// transient-retry behavior.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Attempts before giving up.
    pub retries: u32,
    /// Base sleep of the exponential backoff between attempts.
    pub retry_base_sleep: Duration,
    /// Apply a public-read ACL to uploaded objects.
    pub public: bool,
    /// Check that the object exists after upload.
    pub validate: bool,
    /// Produce a signed URL with this TTL.
    pub signed_url_ttl: Option<Duration>,
    /// The object-store CLI (tests point this at a stub).
    pub object_store_cli: PathBuf,
    /// The signing CLI.
    pub signing_cli: PathBuf,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_base_sleep: Duration::from_millis(500),
            public: false,
            validate: false,
            signed_url_ttl: None,
            object_store_cli: PathBuf::from("gsutil"),
            signing_cli: PathBuf::from("gcloud"),
        }
    }
}

/// A successfully delivered artifact.
#[derive(Debug, Clone)]
pub struct UploadedObject {
    /// `gs://bucket/key`.
    pub url: String,
    /// Size of the uploaded file in bytes.
    pub size: u64,
    /// A time-limited HTTPS URL, when signing is configured.
    pub signed_url: Option<String>,
}

/// The fetcher's inverse: pushes artifacts to the object store.
#[derive(Debug, Clone)]
pub struct Uploader {
    policy: UploadPolicy,
}

impl Uploader {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    /// Upload `file` to `gs://<bucket>/<key>`, retrying transient failures.
    #[instrument(skip(self, file), level = "debug")]
    pub async fn upload(
        &self,
        file: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<UploadedObject, UploadError> {
        let size = fs_err::metadata(file)?.len();
        let dest = format!("gs://{bucket}/{key}");

        let mut attempt = 0;
        let mut sleep = self.policy.retry_base_sleep;
        loop {
            match self.copy(file, &dest).await? {
                Ok(()) => break,
                Err(stderr) => {
                    attempt += 1;
                    if attempt > self.policy.retries {
                        return Err(UploadError::Exhausted {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                            attempts: attempt,
                            stderr,
                        });
                    }
                    debug!("Upload attempt {attempt} for `{dest}` failed, retrying in {sleep:?}");
                    tokio::time::sleep(sleep).await;
                    sleep *= 2;
                }
            }
        }

        if self.policy.validate && !self.exists(&dest).await? {
            return Err(UploadError::Validation {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let signed_url = match self.policy.signed_url_ttl {
            Some(ttl) => self.sign(&dest, ttl).await,
            None => None,
        };

        Ok(UploadedObject {
            url: dest,
            size,
            signed_url,
        })
    }

    async fn copy(&self, file: &Path, dest: &str) -> Result<Result<(), String>, UploadError> {
        let src = file.to_str().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "non-UTF-8 artifact path")
        })?;
        let mut args = vec!["-q", "cp"];
        if self.policy.public {
            args.extend(["-a", "public-read"]);
        }
        args.extend([src, dest]);

        let output = tokio::process::Command::new(&self.policy.object_store_cli)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if output.status.success() {
            Ok(Ok(()))
        } else {
            Ok(Err(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }

    async fn exists(&self, dest: &str) -> Result<bool, UploadError> {
        let output = tokio::process::Command::new(&self.policy.object_store_cli)
            .args(["-q", "ls", dest])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output.status.success())
    }

    /// Signing is best-effort: a failure downgrades to a warning and the
    /// response simply carries no signed URL.
    async fn sign(&self, dest: &str, ttl: Duration) -> Option<String> {
        let output = tokio::process::Command::new(&self.policy.signing_cli)
            .args([
                "storage",
                "sign-url",
                "--duration",
                &format!("{}s", ttl.as_secs()),
                dest,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            warn!(
                "Signing `{dest}` failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .find(|token| token.starts_with("https://"))
            .map(ToString::to_string)
    }
}
