//! AI code-generation backends.
//!
//! The pipelines depend only on [`CodeGenClient`]. [`build_client`] picks the
//! Claude or Gemini CLI backend from configuration once at startup.

pub mod claude;
pub mod gemini;
pub mod stream;

use std::future::Future;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStdout, Command};
use tracing::warn;

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;

use crate::config::{AiProvider, Config};
use crate::errors::CodeGenError;
use crate::models::CodeGenOutput;

/// Runs an AI coding agent against a working copy.
/// Real implementations: `ClaudeClient`, `GeminiClient`. Test double: `FakeCodeGen`.
#[async_trait]
pub trait CodeGenClient: Send + Sync {
    /// Ask the agent to change the code in `work_dir` according to `prompt`.
    async fn generate(&self, prompt: &str, work_dir: &Path) -> Result<CodeGenOutput, CodeGenError>;

    /// Make sure the agent's repository guide file exists in `work_dir`.
    async fn ensure_context_file(&self, _work_dir: &Path) -> Result<(), CodeGenError> {
        Ok(())
    }
}

/// Construct the configured backend.
pub fn build_client(config: &Config) -> Arc<dyn CodeGenClient> {
    match config.ai_provider {
        AiProvider::Claude => Arc::new(ClaudeClient::new(
            config.claude.clone(),
            config.generate_context_file,
        )),
        AiProvider::Gemini => Arc::new(GeminiClient::new(
            config.gemini.clone(),
            config.generate_context_file,
        )),
    }
}

/// What an agent process left behind.
pub(crate) struct AgentRun<T> {
    pub output: T,
    pub status: ExitStatus,
    pub stderr: String,
}

/// Spawn `command` in `work_dir`, hand its stdout to `consume`, and wait for
/// exit, all under one deadline. The process is killed if the deadline passes.
pub(crate) async fn run_agent<T, F, Fut>(
    mut command: Command,
    work_dir: &Path,
    timeout: Duration,
    consume: F,
) -> Result<AgentRun<T>, CodeGenError>
where
    F: FnOnce(ChildStdout) -> Fut,
    Fut: Future<Output = T>,
{
    let mut child = command
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(CodeGenError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CodeGenError::Other(anyhow::anyhow!("agent stdout was not captured")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| CodeGenError::Other(anyhow::anyhow!("agent stderr was not captured")))?;

    // Drained separately so a chatty stderr cannot fill the pipe and stall the agent
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let run = async {
        let output = consume(stdout).await;
        let status = child.wait().await;
        (output, status)
    };

    let finished = tokio::time::timeout(timeout, run).await;
    match finished {
        Ok((output, status)) => {
            let status = status.map_err(|e| CodeGenError::Other(e.into()))?;
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(AgentRun {
                output,
                status,
                stderr,
            })
        }
        Err(_) => {
            stderr_task.abort();
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed out agent process");
            }
            Err(CodeGenError::Timeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Map a non-zero exit to `ProcessFailed`.
pub(crate) fn check_exit(status: ExitStatus, stderr: &str) -> Result<(), CodeGenError> {
    if status.success() {
        Ok(())
    } else {
        Err(CodeGenError::ProcessFailed {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}
