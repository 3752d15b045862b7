//! The headless job worker.
//!
//! A job moves through fixed states: received, realizing, staging, executing,
//! uploading, done; any state may fall to a classified failure. Cleanup of
//! staged inputs runs on every exit path, success or not.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument};

use heddle_cache::Cache;
use heddle_client::{
    FetchError, Fetcher, FetcherBuilder, UploadError, UploadPolicy, Uploader,
};
use heddle_config::Config;
use heddle_git::GitResolver;
use heddle_realize::{RealizeError, RealizeOptions, Realizer, Workspace};
use heddle_spec::{ResolvedLock, SpecError, SpecResolver, VersionSpec};
use heddle_types::{ErrorKind, VersionId};

pub use engine::{ArtifactRef, EngineClient, EngineLaunch, EngineProcess};
pub use payload::{ErrorBody, JobPayload, JobResponse, OutputMode};
pub use staging::{cleanup_request, stage_inputs, StagedInputs};

mod engine;
mod payload;
mod rewrite;
mod staging;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Malformed job payload: {0}")]
    Payload(String),

    #[error("Version `{version_id}` has no resolved lock and no spec; create and validate it first")]
    VersionUnknown { version_id: VersionId },

    #[error(transparent)]
    Realize(#[from] RealizeError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Failed to stage input `{name}`")]
    Staging {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to fetch workflow from `{url}`: {message}")]
    WorkflowFetch { url: String, message: String },

    #[error("Engine startup failed: {message}")]
    EngineStart { message: String },

    #[error("Graph execution failed: {message}")]
    EngineExec { message: String },

    #[error("The graph completed but produced no artifact")]
    NoArtifact,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Payload(_) => ErrorKind::Usage,
            Self::VersionUnknown { .. } => ErrorKind::Validation,
            Self::Realize(err) => err.kind(),
            Self::Spec(err) => err.kind(),
            Self::Staging { source, .. } => source.kind(),
            Self::WorkflowFetch { .. } => ErrorKind::Network,
            Self::EngineStart { .. } => ErrorKind::EngineStart,
            Self::EngineExec { .. } | Self::NoArtifact => ErrorKind::EngineExec,
            Self::Upload(err) => err.kind(),
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Worker-level knobs, independent of any one payload.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub port: u16,
    /// Engine readiness budget.
    pub ready_timeout: Duration,
    /// Overall graph execution budget; on expiry the engine process group is
    /// terminated.
    pub exec_timeout: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            port: 8188,
            ready_timeout: Duration::from_secs(60),
            exec_timeout: Duration::from_secs(600),
        }
    }
}

/// Runs one job at a time against its version's workspace.
#[derive(Debug, Clone)]
pub struct JobHandler {
    config: Config,
    cache: Cache,
    fetcher: Fetcher,
    realizer: Realizer,
    options: HandlerOptions,
}

impl JobHandler {
    pub fn new(config: Config) -> Result<Self, io::Error> {
        let cache = Cache::from_path(config.cache_root())?;
        let git = GitResolver::new(cache.clone(), config.offline);
        let fetcher = FetcherBuilder::new(cache.clone())
            .offline(config.offline)
            .hub_token(config.hub_token.clone())
            .market_token(config.market_token.clone())
            .retries(config.object.retries)
            .build();
        let realizer = Realizer::new(git, fetcher.clone());
        Ok(Self {
            config,
            cache,
            fetcher,
            realizer,
            options: HandlerOptions::default(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run a job and fold any failure into the structured error response.
    pub async fn run_to_response(&self, raw: &Value, request_id: &str) -> JobResponse {
        let payload = match JobPayload::parse(raw) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Rejected payload: {err}");
                return JobResponse::error(err.kind(), err.to_string());
            }
        };
        match self.run(&payload, request_id).await {
            Ok(response) => response,
            Err(err) => {
                error!("Job {request_id} failed: {err}");
                JobResponse::error(err.kind(), full_message(&err))
            }
        }
    }

    /// Execute one parsed job.
    #[instrument(skip_all, fields(request_id = %request_id, version_id = %payload.version_id))]
    pub async fn run(
        &self,
        payload: &JobPayload,
        request_id: &str,
    ) -> Result<JobResponse, HandlerError> {
        // Realizing.
        info!("Realizing version {}", payload.version_id);
        let lock = self.ensure_lock(&payload.version_id).await?;
        let workspace = Workspace::new(self.config.workspace_dir(&payload.version_id))
            .with_models_dir(payload.models_dir.clone().or(self.config.models_dir.clone()));
        // The spec's own options compose with the environment.
        let offline = self.config.offline || lock.options.offline;
        let realizer = if offline && !self.config.offline {
            Realizer::new(
                GitResolver::new(self.cache.clone(), offline),
                FetcherBuilder::new(self.cache.clone())
                    .offline(offline)
                    .hub_token(self.config.hub_token.clone())
                    .market_token(self.config.market_token.clone())
                    .build(),
            )
        } else {
            self.realizer.clone()
        };
        realizer
            .realize(
                &lock,
                &workspace,
                &RealizeOptions {
                    offline,
                    skip_models: lock.options.skip_models,
                    ..RealizeOptions::default()
                },
            )
            .await?;

        // Staging.
        info!("Staging inputs");
        let mut workflow = self.obtain_workflow(payload).await?;
        let staged = stage_inputs(
            &self.fetcher,
            &workspace.input_dir(),
            request_id,
            &payload.merged_inputs(),
        )
        .await?;

        // Executing and delivering, with cleanup on every path.
        let result = self
            .execute_and_deliver(payload, request_id, &lock, &workspace, &mut workflow, &staged)
            .await;
        staged.cleanup();
        result
    }

    async fn execute_and_deliver(
        &self,
        payload: &JobPayload,
        request_id: &str,
        lock: &ResolvedLock,
        workspace: &Workspace,
        workflow: &mut Value,
        staged: &StagedInputs,
    ) -> Result<JobResponse, HandlerError> {
        let rewritten = rewrite::rewrite_workflow(workflow, staged.mapping());
        info!("Rewrote {rewritten} staged input reference(s)");

        // Executing.
        let mut launch = EngineLaunch::new(workspace.clone());
        launch.env = lock.env.clone();
        launch.port = self.options.port;
        launch.verbose = payload.verbose;
        let engine = launch.spawn().await?;

        let execution = async {
            engine.client.wait_ready(self.options.ready_timeout).await?;
            info!("Submitting graph");
            let prompt_id = engine.client.submit(workflow, request_id).await?;
            engine
                .client
                .wait_complete(&prompt_id, self.options.exec_timeout)
                .await
        }
        .await;
        engine.shutdown().await;
        let artifacts = execution?;

        let primary = artifacts.first().ok_or(HandlerError::NoArtifact)?;
        let artifact_path = primary.path(workspace);
        if !artifact_path.is_file() {
            return Err(HandlerError::EngineExec {
                message: format!(
                    "the engine reported `{}` but the file is missing",
                    artifact_path.display()
                ),
            });
        }

        // Uploading / delivering.
        let mode = payload
            .output_mode
            .or_else(|| {
                self.config
                    .output_mode
                    .as_deref()
                    .and_then(|mode| mode.parse::<OutputMode>().ok())
            })
            .unwrap_or(OutputMode::Object);
        match mode {
            OutputMode::Base64 => {
                info!("Delivering inline");
                let bytes = fs_err::read(&artifact_path)?;
                use base64::Engine as _;
                Ok(JobResponse::Base64 {
                    size: bytes.len() as u64,
                    base64: base64::engine::general_purpose::STANDARD.encode(bytes),
                })
            }
            OutputMode::Object => {
                info!("Uploading artifact");
                let bucket = payload
                    .object_bucket
                    .clone()
                    .or_else(|| self.config.object.bucket.clone())
                    .ok_or(HandlerError::Upload(UploadError::MissingBucket))?;
                let prefix = payload
                    .object_prefix
                    .clone()
                    .or_else(|| self.config.object.prefix.clone())
                    .unwrap_or_else(|| "heddle/outputs".to_string());
                let key = object_key(&prefix, request_id, &artifact_path);
                let uploader = Uploader::new(UploadPolicy {
                    retries: self.config.object.retries,
                    retry_base_sleep: self.config.object.retry_base_sleep,
                    public: self.config.object.public,
                    validate: self.config.object.validate,
                    signed_url_ttl: self.config.object.signed_url_ttl,
                    ..UploadPolicy::default()
                });
                let uploaded = uploader.upload(&artifact_path, &bucket, &key).await?;
                Ok(JobResponse::Object {
                    object_url: uploaded.url,
                    size: uploaded.size,
                    signed_url: uploaded.signed_url,
                })
            }
        }
    }

    /// The lock for a version, resolving its spec on first use.
    async fn ensure_lock(&self, version_id: &VersionId) -> Result<ResolvedLock, HandlerError> {
        let lock_path = self.cache.resolved_lock(version_id);
        if let Some(lock) = ResolvedLock::load_optional(&lock_path)? {
            return Ok(lock);
        }
        let spec_path = self
            .config
            .specs_dir()
            .join(format!("{version_id}.json"));
        let spec = match VersionSpec::load(&spec_path) {
            Ok(spec) => spec,
            Err(SpecError::SpecNotFound(_)) => {
                return Err(HandlerError::VersionUnknown {
                    version_id: version_id.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let git = GitResolver::new(self.cache.clone(), self.config.offline);
        let resolver = SpecResolver::new(self.cache.clone(), git);
        let (lock, _) = resolver.resolve_and_store(&spec).await?;
        Ok(lock)
    }

    /// The workflow: inline from the payload, or fetched fresh from the URL.
    async fn obtain_workflow(&self, payload: &JobPayload) -> Result<Value, HandlerError> {
        if let Some(workflow) = &payload.workflow {
            return Ok(workflow.clone());
        }
        let url = payload
            .workflow_url
            .as_deref()
            .expect("validated: workflow or workflow_url is present");
        let response = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| HandlerError::WorkflowFetch {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        response
            .json()
            .await
            .map_err(|err| HandlerError::WorkflowFetch {
                url: url.to_string(),
                message: format!("not valid JSON: {err}"),
            })
    }
}

/// `<prefix>/<request_id>_<timestamp>-<uuid>.<ext>`
fn object_key(prefix: &str, request_id: &str, artifact: &Path) -> String {
    let ext = artifact
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin");
    let timestamp = jiff::Timestamp::now().strftime("%Y%m%d%H%M%S");
    let unique = uuid::Uuid::new_v4();
    format!(
        "{}/{request_id}_{timestamp}-{unique}.{ext}",
        prefix.trim_end_matches('/'),
    )
}

fn full_message(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::object_key;

    #[test]
    fn object_keys_are_request_scoped_and_unique() {
        let artifact = Path::new("/ws/output/img_00001_.png");
        let a = object_key("heddle/outputs/", "req-1", artifact);
        let b = object_key("heddle/outputs", "req-1", artifact);
        assert!(a.starts_with("heddle/outputs/req-1_"));
        assert!(a.ends_with(".png"));
        assert_ne!(a, b);

        let no_ext = object_key("p", "req-2", Path::new("/ws/output/artifact"));
        assert!(no_ext.ends_with(".bin"));
    }
}
