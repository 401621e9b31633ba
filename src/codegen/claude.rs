//! Claude Code CLI backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::{info, warn};

use super::stream::{StreamReader, collect_response};
use super::{CodeGenClient, check_exit, run_agent};
use crate::config::ClaudeSection;
use crate::errors::CodeGenError;
use crate::models::CodeGenOutput;

pub const CONTEXT_FILE: &str = "CLAUDE.md";

const CONTEXT_PROMPT: &str = "Create a concise CLAUDE.md file in the root of this repository that \
indexes the markdown documentation it contains. Include a table of contents, group the files \
logically by directory or purpose, give each file a one or two sentence description, and link to \
the files with relative links instead of copying their content.";

pub struct ClaudeClient {
    settings: ClaudeSection,
    context_file: bool,
}

impl ClaudeClient {
    pub fn new(settings: ClaudeSection, context_file: bool) -> Self {
        Self {
            settings,
            context_file,
        }
    }

    /// CLI arguments for one non-interactive run.
    pub fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = Vec::new();
        if self.settings.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if !self.settings.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.settings.allowed_tools.clone());
        }
        if !self.settings.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(self.settings.disallowed_tools.clone());
        }
        args.extend([
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "-p".to_string(),
            prompt.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl CodeGenClient for ClaudeClient {
    async fn generate(&self, prompt: &str, work_dir: &Path) -> Result<CodeGenOutput, CodeGenError> {
        let mut command = Command::new(&self.settings.cli_path);
        command.args(self.args(prompt));
        let timeout = Duration::from_secs(self.settings.timeout_seconds);

        info!(dir = %work_dir.display(), "running claude");
        let run = run_agent(command, work_dir, timeout, |stdout| {
            collect_response(StreamReader::new(BufReader::new(stdout)))
        })
        .await?;

        // A reported error explains more than the exit code does
        let content = match run.output {
            Err(err @ CodeGenError::Reported(_)) => return Err(err),
            other => {
                check_exit(run.status, &run.stderr)?;
                other?
            }
        };

        Ok(CodeGenOutput {
            success: true,
            content,
        })
    }

    async fn ensure_context_file(&self, work_dir: &Path) -> Result<(), CodeGenError> {
        if !self.context_file || work_dir.join(CONTEXT_FILE).exists() {
            return Ok(());
        }
        info!("{} missing, generating it", CONTEXT_FILE);
        self.generate(CONTEXT_PROMPT, work_dir).await?;
        if !work_dir.join(CONTEXT_FILE).exists() {
            warn!("claude finished without writing {}", CONTEXT_FILE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> ClaudeSection {
        ClaudeSection::default()
    }

    #[test]
    fn test_args_default() {
        let client = ClaudeClient::new(settings(), false);
        assert_eq!(
            client.args("fix it"),
            vec!["--output-format", "stream-json", "--verbose", "-p", "fix it"]
        );
    }

    #[test]
    fn test_args_with_permissions_and_tools() {
        let mut s = settings();
        s.dangerously_skip_permissions = true;
        s.allowed_tools = "Read,Edit".into();
        s.disallowed_tools = "WebFetch".into();
        let args = ClaudeClient::new(s, false).args("p");
        assert_eq!(
            &args[..5],
            &[
                "--dangerously-skip-permissions",
                "--allowedTools",
                "Read,Edit",
                "--disallowedTools",
                "WebFetch"
            ]
        );
        assert_eq!(args.last().map(String::as_str), Some("p"));
    }

    #[tokio::test]
    async fn test_context_file_skipped_when_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONTEXT_FILE), "# guide").unwrap();
        let mut s = settings();
        s.cli_path = "definitely-not-claude".into();
        // Would fail to spawn if it tried to run
        ClaudeClient::new(s, true)
            .ensure_context_file(dir.path())
            .await
            .unwrap();
    }

    #[cfg(unix)]
    fn fake_cli(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_parses_stream() {
        let dir = TempDir::new().unwrap();
        let mut s = settings();
        s.cli_path = fake_cli(
            dir.path(),
            r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"result","subtype":"success","result":"All done","is_error":false}'"#,
        );
        let output = ClaudeClient::new(s, false)
            .generate("fix", dir.path())
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.content, "All done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_reports_error_result() {
        let dir = TempDir::new().unwrap();
        let mut s = settings();
        s.cli_path = fake_cli(
            dir.path(),
            r#"echo '{"type":"result","subtype":"error_during_execution","result":"rate limited","is_error":true}'
exit 1"#,
        );
        match ClaudeClient::new(s, false).generate("fix", dir.path()).await {
            Err(CodeGenError::Reported(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("Expected Reported, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_times_out() {
        let dir = TempDir::new().unwrap();
        let mut s = settings();
        s.cli_path = fake_cli(dir.path(), "sleep 30");
        s.timeout_seconds = 1;
        match ClaudeClient::new(s, false).generate("fix", dir.path()).await {
            Err(CodeGenError::Timeout { secs }) => assert_eq!(secs, 1),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }
}
