//! Gemini CLI backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::{CodeGenClient, check_exit, run_agent};
use crate::config::GeminiSection;
use crate::errors::CodeGenError;
use crate::models::CodeGenOutput;

pub const CONTEXT_FILE: &str = "GEMINI.md";

const CONTEXT_PROMPT: &str = "Create a concise GEMINI.md file in the root of this repository that \
indexes the markdown documentation it contains. Include a table of contents, group the files \
logically by directory or purpose, give each file a one or two sentence description, and link to \
the files with relative links instead of copying their content.";

pub struct GeminiClient {
    settings: GeminiSection,
    context_file: bool,
}

impl GeminiClient {
    pub fn new(settings: GeminiSection, context_file: bool) -> Self {
        Self {
            settings,
            context_file,
        }
    }

    pub fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec!["--yolo".to_string()];
        if !self.settings.model.is_empty() {
            args.push("-m".to_string());
            args.push(self.settings.model.clone());
        }
        if self.settings.all_files {
            args.push("--all-files".to_string());
        }
        if self.settings.sandbox {
            args.push("--sandbox".to_string());
        }
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl CodeGenClient for GeminiClient {
    async fn generate(&self, prompt: &str, work_dir: &Path) -> Result<CodeGenOutput, CodeGenError> {
        let mut command = Command::new(&self.settings.cli_path);
        command.args(self.args(prompt));
        if !self.settings.api_key.is_empty() {
            command.env("GEMINI_API_KEY", &self.settings.api_key);
        }
        let timeout = Duration::from_secs(self.settings.timeout_seconds);

        info!(dir = %work_dir.display(), "running gemini");
        let run = run_agent(command, work_dir, timeout, |mut stdout| async move {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).await.map(|_| buf)
        })
        .await?;

        check_exit(run.status, &run.stderr)?;
        let content = run.output.map_err(|e| CodeGenError::Other(e.into()))?;
        if content.trim().is_empty() {
            return Err(CodeGenError::NoResult);
        }

        Ok(CodeGenOutput {
            success: true,
            content: content.trim().to_string(),
        })
    }

    async fn ensure_context_file(&self, work_dir: &Path) -> Result<(), CodeGenError> {
        if !self.context_file || work_dir.join(CONTEXT_FILE).exists() {
            return Ok(());
        }
        info!("{} missing, generating it", CONTEXT_FILE);
        self.generate(CONTEXT_PROMPT, work_dir).await?;
        if !work_dir.join(CONTEXT_FILE).exists() {
            warn!("gemini finished without writing {}", CONTEXT_FILE);
        }
        Ok(())
    }
}
