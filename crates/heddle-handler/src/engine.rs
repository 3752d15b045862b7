use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use heddle_realize::Workspace;
use heddle_spec::expand_vars;

use crate::HandlerError;

/// How often readiness and completion are polled.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to start the engine against a realized workspace.
#[derive(Debug, Clone)]
pub struct EngineLaunch {
    pub workspace: Workspace,
    /// Spec-declared environment; `${VAR}` references expand against the
    /// process environment at launch.
    pub env: BTreeMap<String, String>,
    pub host: Option<String>,
    pub port: u16,
    pub extra_args: Vec<String>,
    /// Stream engine output to stderr instead of discarding it.
    pub verbose: bool,
}

impl EngineLaunch {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            env: BTreeMap::new(),
            host: None,
            port: 8188,
            extra_args: Vec::new(),
            verbose: false,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// The engine invocation: the workspace interpreter running the engine's
    /// `main` entrypoint with the workspace directories and the model-paths
    /// config.
    pub fn command(&self) -> Command {
        let mut command = Command::new(self.workspace.venv_python());
        command
            .arg(self.workspace.engine_dir().join("main.py"))
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--extra-model-paths-config")
            .arg(self.workspace.model_paths_config())
            .arg("--input-directory")
            .arg(self.workspace.input_dir())
            .arg("--output-directory")
            .arg(self.workspace.output_dir())
            .arg("--temp-directory")
            .arg(self.workspace.temp_dir());
        if let Some(host) = &self.host {
            command.arg("--listen").arg(host);
        }
        command.args(&self.extra_args);
        for (name, value) in &self.env {
            command.env(name, expand_vars(value, |var| std::env::var(var).ok()));
        }
        command.current_dir(self.workspace.engine_dir());
        // The engine forks workers; cancellation must take out the whole
        // group, not just the parent pid.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Spawn the engine as a managed subprocess.
    pub async fn spawn(&self) -> Result<EngineProcess, HandlerError> {
        let mut command = self.command();
        command
            .stdin(Stdio::null())
            .stdout(if self.verbose { Stdio::piped() } else { Stdio::null() })
            .stderr(if self.verbose { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        info!("Launching engine on port {}", self.port);
        let mut child = command.spawn().map_err(|err| HandlerError::EngineStart {
            message: format!("failed to spawn the engine: {err}"),
        })?;

        if self.verbose {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_output(stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_output(stderr));
            }
        }

        Ok(EngineProcess {
            child,
            client: EngineClient::new(self.base_url()),
        })
    }
}

async fn forward_output(stream: impl tokio::io::AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("[engine] {line}");
    }
}

/// A reference to one produced artifact, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub filename: String,
    pub subfolder: String,
}

impl ArtifactRef {
    pub fn path(&self, workspace: &Workspace) -> PathBuf {
        let mut path = workspace.output_dir();
        if !self.subfolder.is_empty() {
            path = path.join(&self.subfolder);
        }
        path.join(&self.filename)
    }
}

/// The engine's local HTTP API.
#[derive(Debug, Clone)]
pub struct EngineClient {
    base_url: String,
    client: reqwest::Client,
}

impl EngineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Poll until the engine answers, with one-second granularity.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), HandlerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Engine is ready");
                    return Ok(());
                }
                Ok(response) => debug!("Engine not ready yet: HTTP {}", response.status()),
                Err(err) => debug!("Engine not ready yet: {err}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HandlerError::EngineStart {
                    message: format!("engine not ready after {timeout:?}"),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Submit a graph; returns the prompt id to poll.
    pub async fn submit(&self, workflow: &Value, client_id: &str) -> Result<String, HandlerError> {
        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&serde_json::json!({"prompt": workflow, "client_id": client_id}))
            .send()
            .await
            .map_err(|err| HandlerError::EngineExec {
                message: format!("graph submission failed: {err}"),
            })?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| HandlerError::EngineExec {
                message: format!("unreadable submission response: {err}"),
            })?;
        if !status.is_success() {
            return Err(HandlerError::EngineExec {
                message: format!("graph rejected (HTTP {status}): {body}"),
            });
        }
        body.get("prompt_id")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| HandlerError::EngineExec {
                message: format!("submission response carried no prompt id: {body}"),
            })
    }

    /// Poll the history endpoint until the graph finishes; returns the
    /// produced artifacts.
    pub async fn wait_complete(
        &self,
        prompt_id: &str,
        timeout: Duration,
    ) -> Result<Vec<ArtifactRef>, HandlerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self
                .client
                .get(format!("{}/history/{prompt_id}", self.base_url))
                .send()
                .await
                .map_err(|err| HandlerError::EngineExec {
                    message: format!("history poll failed: {err}"),
                })?;
            if response.status().is_success() {
                let body: Value =
                    response
                        .json()
                        .await
                        .map_err(|err| HandlerError::EngineExec {
                            message: format!("unreadable history response: {err}"),
                        })?;
                if let Some(entry) = body.get(prompt_id) {
                    if let Some(message) = execution_error(entry) {
                        return Err(HandlerError::EngineExec { message });
                    }
                    if is_complete(entry) {
                        return Ok(collect_artifacts(entry));
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HandlerError::EngineExec {
                    message: format!("graph did not finish within {timeout:?}"),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn is_complete(entry: &Value) -> bool {
    if entry
        .get("status")
        .and_then(|status| status.get("completed"))
        .and_then(Value::as_bool)
        == Some(true)
    {
        return true;
    }
    // Older engines have no status block; a history entry with outputs is
    // complete.
    entry.get("outputs").is_some_and(Value::is_object)
}

fn execution_error(entry: &Value) -> Option<String> {
    let status = entry.get("status")?;
    if status.get("status_str").and_then(Value::as_str) == Some("error") {
        let detail = status
            .get("messages")
            .map(ToString::to_string)
            .unwrap_or_default();
        return Some(format!("the engine reported a graph failure {detail}"));
    }
    None
}

/// Walk the outputs block and collect every file reference that is not a
/// temp preview.
fn collect_artifacts(entry: &Value) -> Vec<ArtifactRef> {
    let mut artifacts = Vec::new();
    let Some(outputs) = entry.get("outputs").and_then(Value::as_object) else {
        return artifacts;
    };
    for node_output in outputs.values() {
        let Some(node_output) = node_output.as_object() else {
            continue;
        };
        for value in node_output.values() {
            let Some(items) = value.as_array() else { continue };
            for item in items {
                let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                    continue;
                };
                if item.get("type").and_then(Value::as_str) == Some("temp") {
                    continue;
                }
                artifacts.push(ArtifactRef {
                    filename: filename.to_string(),
                    subfolder: item
                        .get("subfolder")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
    }
    artifacts
}

/// A running engine subprocess and its API client.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    pub client: EngineClient,
}

impl EngineProcess {
    /// Terminate the engine's whole process group, escalating from SIGTERM
    /// to SIGKILL.
    pub async fn shutdown(mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Some(pid) = self.child.id() {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(_) => debug!("Engine exited"),
            Err(_) => {
                warn!("Engine ignored SIGTERM, killing");
                #[cfg(unix)]
                {
                    use nix::sys::signal::{killpg, Signal};
                    use nix::unistd::Pid;
                    if let Some(pid) = self.child.id() {
                        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    }
                }
                let _ = self.child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{collect_artifacts, is_complete, ArtifactRef};

    #[test]
    fn artifacts_skip_temp_previews() {
        let entry = json!({
            "outputs": {
                "9": {"images": [
                    {"filename": "out_00001_.png", "subfolder": "", "type": "output"},
                    {"filename": "preview.png", "subfolder": "", "type": "temp"}
                ]},
                "12": {"gifs": [
                    {"filename": "anim.webp", "subfolder": "runs", "type": "output"}
                ]}
            }
        });
        let artifacts = collect_artifacts(&entry);
        assert_eq!(
            artifacts,
            vec![
                ArtifactRef {
                    filename: "out_00001_.png".to_string(),
                    subfolder: String::new(),
                },
                ArtifactRef {
                    filename: "anim.webp".to_string(),
                    subfolder: "runs".to_string(),
                },
            ]
        );
    }

    #[test]
    fn completion_detection_handles_both_generations() {
        assert!(is_complete(&json!({"status": {"completed": true}})));
        assert!(is_complete(&json!({"outputs": {}})));
        assert!(!is_complete(&json!({"status": {"completed": false}})));
    }
}
