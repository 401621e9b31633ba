//! Typed error hierarchy for ticketsmith.
//!
//! Four enums cover the subsystems:
//! - `CredentialError` — GitHub App token signing and exchange
//! - `CodeGenError` — AI code-generation process failures
//! - `PipelineError` — ticket and feedback pipeline failures
//! - `ConfigError` — configuration validation

use std::fmt;

use thiserror::Error;

/// Errors from obtaining a GitHub App installation token.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to sign app assertion: {0}")]
    Signing(String),

    #[error("Token exchange rejected (status {status}): {message}")]
    Exchange { status: u16, message: String },

    #[error("Invalid token exchange response: {0}")]
    InvalidResponse(String),

    #[error("Token exchange request failed: {0}")]
    Transport(String),
}

/// Errors from a single code-generation invocation.
#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("Code generation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Code generation process exited with {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Failed to spawn code generation process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Code generation reported an error: {0}")]
    Reported(String),

    #[error("Code generation produced no response")]
    NoResult,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The pipeline step a hard remote failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    FetchTicket,
    CheckFork,
    CreateFork,
    SyncFork,
    Clone,
    SwitchBranch,
    CreateBranch,
    Pull,
    Commit,
    Push,
    CreatePullRequest,
    FetchPullRequest,
    ListComments,
    ResolveField,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTicket => "fetch ticket",
            Self::CheckFork => "check fork",
            Self::CreateFork => "create fork",
            Self::SyncFork => "sync fork with upstream",
            Self::Clone => "clone repository",
            Self::SwitchBranch => "switch branch",
            Self::CreateBranch => "create branch",
            Self::Pull => "pull changes",
            Self::Commit => "commit changes",
            Self::Push => "push changes",
            Self::CreatePullRequest => "create pull request",
            Self::FetchPullRequest => "fetch pull request",
            Self::ListComments => "list pull request comments",
            Self::ResolveField => "resolve field",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a ticket or feedback pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No components found on ticket")]
    NoComponents,

    #[error("No repository mapping found for component: {component}")]
    NoRepositoryMapping { component: String },

    #[error("Pull request field name is not configured")]
    MissingPrFieldName,

    #[error("Unsupported repository URL format: {0}")]
    InvalidRepositoryUrl(String),

    #[error("Invalid pull request URL: {0}")]
    InvalidPullRequestUrl(String),

    #[error("Pull request has no head repository clone URL")]
    MissingHeadRepository,

    #[error("Fork failed to become ready after {attempts} attempts")]
    ForkNotReady { attempts: u32 },

    #[error("Code generation failed: {0}")]
    CodeGeneration(String),

    #[error("Failed to {step}: {source:#}")]
    Step {
        step: PipelineStep,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn step(step: PipelineStep, source: anyhow::Error) -> Self {
        Self::Step { step, source }
    }
}

impl From<CodeGenError> for PipelineError {
    fn from(err: CodeGenError) -> Self {
        Self::CodeGeneration(err.to_string())
    }
}

/// Configuration validation failure listing every problem found.
#[derive(Debug, Error)]
#[error("Invalid configuration:\n  - {}", problems.join("\n  - "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_mapping_carries_component() {
        let err = PipelineError::NoRepositoryMapping {
            component: "frontend".to_string(),
        };
        match &err {
            PipelineError::NoRepositoryMapping { component } => assert_eq!(component, "frontend"),
            _ => panic!("Expected NoRepositoryMapping"),
        }
        assert_eq!(
            err.to_string(),
            "No repository mapping found for component: frontend"
        );
    }

    #[test]
    fn pipeline_error_step_includes_cause() {
        let err = PipelineError::step(
            PipelineStep::Clone,
            anyhow::anyhow!("repository not found"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to clone repository: repository not found"
        );
    }

    #[test]
    fn pipeline_error_converts_from_codegen_timeout() {
        let err: PipelineError = CodeGenError::Timeout { secs: 300 }.into();
        match &err {
            PipelineError::CodeGeneration(msg) => assert!(msg.contains("300s")),
            _ => panic!("Expected CodeGeneration"),
        }
    }

    #[test]
    fn credential_error_exchange_carries_status() {
        let err = CredentialError::Exchange {
            status: 401,
            message: "Bad credentials".to_string(),
        };
        match &err {
            CredentialError::Exchange { status, .. } => assert_eq!(*status, 401),
            _ => panic!("Expected Exchange"),
        }
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[test]
    fn config_error_lists_every_problem() {
        let err = ConfigError {
            problems: vec!["jira.base_url is required".into(), "bad provider".into()],
        };
        let text = err.to_string();
        assert!(text.contains("jira.base_url is required"));
        assert!(text.contains("bad provider"));
    }
}
