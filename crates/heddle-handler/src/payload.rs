use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use heddle_types::{ErrorKind, VersionId};

use crate::HandlerError;

/// Where the primary artifact goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Base64,
    Object,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown output mode `{other}`")),
        }
    }
}

/// The list form of input declarations.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedImage {
    pub name: String,
    pub image: String,
}

/// One job, as received.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPayload {
    pub version_id: VersionId,
    /// A graph object, or a string holding the graph's JSON.
    #[serde(default)]
    pub workflow: Option<Value>,
    #[serde(default)]
    pub workflow_url: Option<String>,
    /// Map form: logical name to URL.
    #[serde(default)]
    pub input_images: BTreeMap<String, String>,
    /// List form; merged with the map form.
    #[serde(default)]
    pub images: Vec<NamedImage>,
    #[serde(default)]
    pub output_mode: Option<OutputMode>,
    #[serde(default)]
    pub object_bucket: Option<String>,
    #[serde(default)]
    pub object_prefix: Option<String>,
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

impl JobPayload {
    /// Parse and normalize a payload: a stringified `workflow` is unwrapped,
    /// and exactly one of `workflow` / `workflow_url` must be present.
    pub fn parse(raw: &Value) -> Result<Self, HandlerError> {
        let mut payload: JobPayload = serde_json::from_value(raw.clone())
            .map_err(|err| HandlerError::Payload(err.to_string()))?;

        if let Some(Value::String(inline)) = &payload.workflow {
            let parsed: Value = serde_json::from_str(inline).map_err(|err| {
                HandlerError::Payload(format!("`workflow` holds invalid JSON: {err}"))
            })?;
            payload.workflow = Some(parsed);
        }
        if let Some(workflow) = &payload.workflow {
            if !workflow.is_object() {
                return Err(HandlerError::Payload(
                    "`workflow` must be a JSON object".to_string(),
                ));
            }
        }

        match (&payload.workflow, &payload.workflow_url) {
            (Some(_), Some(_)) => Err(HandlerError::Payload(
                "`workflow` and `workflow_url` are mutually exclusive".to_string(),
            )),
            (None, None) => Err(HandlerError::Payload(
                "one of `workflow` or `workflow_url` is required".to_string(),
            )),
            _ => Ok(payload),
        }
    }

    /// Merge both input declaration forms; the list form wins on collision.
    pub fn merged_inputs(&self) -> BTreeMap<String, String> {
        let mut inputs = self.input_images.clone();
        for image in &self.images {
            inputs.insert(image.name.clone(), image.image.clone());
        }
        inputs
    }
}

/// The structured job result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum JobResponse {
    Object {
        object_url: String,
        size: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        signed_url: Option<String>,
    },
    Base64 {
        base64: String,
        size: u64,
    },
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl JobResponse {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            },
        }
    }
}
