use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde_json::{json, Value};

use heddle_config::Config;
use heddle_handler::{JobHandler, JobResponse};
use heddle_types::{ErrorKind, VersionId};

use crate::commands::{CliError, ExitStatus};
use crate::printer::Printer;

/// Realize, run one graph headlessly and emit the structured result.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_handler(
    config: &Config,
    version_id: &str,
    workflow: &Path,
    inputs: &[String],
    output: Option<&str>,
    bucket: Option<String>,
    out_file: Option<PathBuf>,
    verbose: bool,
    _printer: Printer,
) -> Result<ExitStatus> {
    let version_id: VersionId = version_id.parse()?;
    let workflow: Value = serde_json::from_str(&fs_err::read_to_string(workflow)?)
        .map_err(|err| CliError::usage(format!("`{}` is not JSON: {err}", workflow.display())))?;

    let mut input_images = serde_json::Map::new();
    for input in inputs {
        let (name, url) = input
            .split_once('=')
            .ok_or_else(|| CliError::usage(format!("expected NAME=URL, got `{input}`")))?;
        input_images.insert(name.to_string(), Value::String(url.to_string()));
    }

    let mut payload = json!({
        "version_id": version_id.as_str(),
        "workflow": workflow,
        "input_images": input_images,
        "verbose": verbose,
    });
    if let Some(output) = output {
        payload["output_mode"] = json!(output);
    }
    if let Some(bucket) = bucket {
        payload["object_bucket"] = json!(bucket);
    }

    let handler = JobHandler::new(config.clone())?;
    let request_id = uuid::Uuid::new_v4().to_string();
    let response = handler.run_to_response(&payload, &request_id).await;

    let rendered = serde_json::to_string_pretty(&response)? + "\n";
    match out_file {
        Some(out_file) => heddle_fs::write_atomic_sync(out_file, rendered)?,
        None => {
            #[allow(clippy::print_stdout)]
            {
                print!("{rendered}");
            }
        }
    }

    match &response {
        JobResponse::Error { error } => Ok(ExitStatus::Failure(
            ErrorKind::from_str(&error.kind).unwrap_or(ErrorKind::Internal),
        )),
        _ => Ok(ExitStatus::Success),
    }
}
