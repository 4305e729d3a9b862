//! Native runtime fallback
//!
//! Runs middleware in a Node.js child process for bundles that need APIs the
//! sandbox does not provide.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::debug;

use super::executor::{
    parse_script_output, ExecutionError, MiddlewareExecutor, ScriptPayload, ScriptResponse,
};
use super::loader::CompiledMiddleware;
use super::request::EdgeRequest;

const RUNNER: &str = include_str!("js/node_runner.js");

pub struct NativeExecutor {
    node_binary: String,
    timeout: Duration,
    /// Runner script, written on first use
    runner: OnceCell<NamedTempFile>,
}

impl NativeExecutor {
    pub fn new(node_binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            node_binary: node_binary.into(),
            timeout,
            runner: OnceCell::new(),
        }
    }

    async fn runner_path(&self) -> Result<&Path, ExecutionError> {
        let file = self
            .runner
            .get_or_try_init(|| async {
                let mut file = tempfile::Builder::new()
                    .prefix("edge-runner-")
                    .suffix(".cjs")
                    .tempfile()
                    .map_err(|err| ExecutionError::Spawn(err.to_string()))?;
                file.write_all(RUNNER.as_bytes())
                    .and_then(|_| file.flush())
                    .map_err(|err| ExecutionError::Spawn(err.to_string()))?;
                Ok::<_, ExecutionError>(file)
            })
            .await?;
        Ok(file.path())
    }
}

#[async_trait]
impl MiddlewareExecutor for NativeExecutor {
    async fn execute(
        &self,
        middleware: &CompiledMiddleware,
        request: &EdgeRequest,
    ) -> Result<ScriptResponse, ExecutionError> {
        let payload = ScriptPayload::new(middleware, request)
            .with_bundle_location(middleware)
            .to_json()?;
        let runner = self.runner_path().await?;

        let mut child = Command::new(&self.node_binary)
            .arg(runner)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ExecutionError::Spawn(format!("{}: {err}", self.node_binary)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::Spawn("child stdin unavailable".to_string()))?;

        let run = async move {
            stdin.write_all(payload.as_bytes()).await?;
            drop(stdin);
            child.wait_with_output().await
        };
        // Dropping the future on timeout kills the child
        let output = match timeout(self.timeout, run).await {
            Err(_) => return Err(ExecutionError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(ExecutionError::Runtime(err.to_string())),
            Ok(Ok(output)) => output,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(status = %output.status, stderr = %stderr.trim(), "native runtime stderr");
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ExecutionError::Runtime(format!(
                "native runtime exited with {} and no output: {}",
                output.status,
                stderr.trim()
            )));
        }
        parse_script_output(&stdout)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}
