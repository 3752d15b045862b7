//! Process-wide configuration.
//!
//! Everything the core reads from the environment is materialized into a
//! [`Config`] once at startup and handed to components by value; nothing else
//! consults `std::env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use heddle_types::VersionId;

/// Uploader configuration (`OBJECT_*` variables).
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Default bucket for `object` output mode (`OBJECT_BUCKET`).
    pub bucket: Option<String>,
    /// Object key prefix (`OBJECT_PREFIX`).
    pub prefix: Option<String>,
    /// Whether uploads get a public-read ACL (`OBJECT_PUBLIC`).
    pub public: bool,
    /// TTL for signed URLs; `None` disables signing (`OBJECT_SIGNED_URL_TTL`,
    /// seconds).
    pub signed_url_ttl: Option<Duration>,
    /// Upload retry attempts (`OBJECT_RETRIES`).
    pub retries: u32,
    /// Base sleep for exponential upload backoff (`OBJECT_RETRY_BASE_SLEEP`,
    /// seconds).
    pub retry_base_sleep: Duration,
    /// Post-upload existence check (`OBJECT_VALIDATE`).
    pub validate: bool,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: None,
            public: false,
            signed_url_ttl: None,
            retries: 3,
            retry_base_sleep: Duration::from_millis(500),
            validate: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Workspace root override (`ENGINE_HOME`).
    pub engine_home: Option<PathBuf>,
    /// Models directory override (`MODELS_DIR`).
    pub models_dir: Option<PathBuf>,
    /// Cache root override (`CACHE_ROOT`).
    pub cache_root: Option<PathBuf>,
    /// Offline mode (`OFFLINE`).
    pub offline: bool,
    /// Token for authenticated hub downloads (`HUB_TOKEN`).
    pub hub_token: Option<String>,
    /// Token for marketplace downloads (`MARKET_TOKEN`).
    pub market_token: Option<String>,
    /// Default job output mode (`OUTPUT_MODE`).
    pub output_mode: Option<String>,
    pub object: ObjectStoreConfig,
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from a lookup function; the seam the tests use.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let object = ObjectStoreConfig {
            bucket: non_empty(var("OBJECT_BUCKET")),
            prefix: non_empty(var("OBJECT_PREFIX")),
            public: parse_bool("OBJECT_PUBLIC", var("OBJECT_PUBLIC")),
            signed_url_ttl: parse_secs("OBJECT_SIGNED_URL_TTL", var("OBJECT_SIGNED_URL_TTL")),
            retries: parse_u32("OBJECT_RETRIES", var("OBJECT_RETRIES")).unwrap_or(3),
            retry_base_sleep: parse_secs("OBJECT_RETRY_BASE_SLEEP", var("OBJECT_RETRY_BASE_SLEEP"))
                .unwrap_or(Duration::from_millis(500)),
            validate: parse_bool("OBJECT_VALIDATE", var("OBJECT_VALIDATE")),
        };
        Self {
            engine_home: non_empty(var("ENGINE_HOME")).map(PathBuf::from),
            models_dir: non_empty(var("MODELS_DIR")).map(PathBuf::from),
            cache_root: non_empty(var("CACHE_ROOT")).map(PathBuf::from),
            offline: parse_bool("OFFLINE", var("OFFLINE")),
            hub_token: non_empty(var("HUB_TOKEN")),
            market_token: non_empty(var("MARKET_TOKEN")),
            output_mode: non_empty(var("OUTPUT_MODE")),
            object,
        }
    }

    /// The root under which versions live.
    ///
    /// Prefer, in order: the explicit `ENGINE_HOME`; a persistent volume, if
    /// one is mounted; the user's home directory.
    pub fn home(&self) -> PathBuf {
        if let Some(home) = &self.engine_home {
            return home.clone();
        }
        let volume = Path::new("/workspace");
        if volume.is_dir() {
            return volume.join("heddle");
        }
        etcetera::home_dir()
            .map(|home| home.join(".heddle"))
            .unwrap_or_else(|_| PathBuf::from(".heddle"))
    }

    /// Where user-authored specs are stored.
    pub fn specs_dir(&self) -> PathBuf {
        self.home().join("specs")
    }

    /// The workspace directory for a version.
    pub fn workspace_dir(&self, version_id: &VersionId) -> PathBuf {
        self.home().join("versions").join(version_id.as_str())
    }

    /// The shared cache root.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(|| self.home().join("cache"))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn parse_bool(name: &str, value: Option<String>) -> bool {
    let Some(value) = non_empty(value) else {
        return false;
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("Unrecognized boolean `{other}` for `{name}`, assuming false");
            false
        }
    }
}

fn parse_u32(name: &str, value: Option<String>) -> Option<u32> {
    let value = non_empty(value)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Unrecognized integer `{value}` for `{name}`, using default");
            None
        }
    }
}

fn parse_secs(name: &str, value: Option<String>) -> Option<Duration> {
    let value = non_empty(value)?;
    match value.parse::<f64>() {
        Ok(secs) if secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            warn!("Unrecognized duration `{value}` for `{name}`, using default");
            None
        }
    }
}
