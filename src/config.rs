//! Configuration for ticketsmith.
//!
//! Read from a TOML file (default `ticketsmith.toml`), then overridden by
//! environment variables, then by CLI flags in `main`.
//!
//! # Configuration File Format
//!
//! ```toml
//! work_dir = "/tmp/ticketsmith"
//! ai_provider = "claude"
//!
//! [jira]
//! base_url = "https://jira.example.com"
//! username = "ai-bot"
//! interval_seconds = 300
//! pr_field_name = "Git Pull Request"
//!
//! [jira.status_transitions]
//! todo = "To Do"
//! in_progress = "In Progress"
//! in_review = "In Review"
//!
//! [github]
//! bot_username = "ai-bot"
//! bot_email = "ai-bot@example.com"
//! target_branch = "main"
//! app_id = 12345
//! installation_id = 67890
//! private_key_path = "/etc/ticketsmith/app.pem"
//!
//! [component_to_repo]
//! frontend = "https://github.com/example/frontend.git"
//! ```
//!
//! Secrets are usually supplied through the environment instead:
//! `JIRA_API_TOKEN`, `GITHUB_TOKEN`, `GITHUB_APP_PRIVATE_KEY`, `GEMINI_API_KEY`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const REDACTED: &str = "***";

/// Which AI coding agent generates the changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Claude,
    Gemini,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Claude => write!(f, "claude"),
            AiProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for AiProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(AiProvider::Claude),
            "gemini" => Ok(AiProvider::Gemini),
            _ => anyhow::bail!("Invalid AI provider '{}'. Valid values: claude, gemini", s),
        }
    }
}

/// Jira status names the pipelines move tickets between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransitions {
    #[serde(default = "default_todo")]
    pub todo: String,
    #[serde(default = "default_in_progress")]
    pub in_progress: String,
    #[serde(default = "default_in_review")]
    pub in_review: String,
}

fn default_todo() -> String {
    "To Do".to_string()
}

fn default_in_progress() -> String {
    "In Progress".to_string()
}

fn default_in_review() -> String {
    "In Review".to_string()
}

impl Default for StatusTransitions {
    fn default() -> Self {
        Self {
            todo: default_todo(),
            in_progress: default_in_progress(),
            in_review: default_in_review(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSection {
    #[serde(default)]
    pub base_url: String,
    /// Bot account; also used to drop the bot's own comments from prompts.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    /// Seconds between scans
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Suppress "AI failed to process this ticket" comments
    #[serde(default)]
    pub disable_error_comments: bool,
    /// Custom field that stores the PR URL. Required by the feedback scanner.
    #[serde(default)]
    pub pr_field_name: Option<String>,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
}

fn default_interval_seconds() -> u64 {
    300
}

impl Default for JiraSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            api_token: String::new(),
            interval_seconds: default_interval_seconds(),
            disable_error_comments: false,
            pr_field_name: None,
            status_transitions: StatusTransitions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    /// REST endpoint. Only github.com is supported: git remotes and
    /// repository URLs are always github.com.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub bot_email: String,
    /// Base branch for new pull requests
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub personal_access_token: Option<String>,
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub installation_id: Option<u64>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// PEM text; takes precedence over `private_key_path`
    #[serde(default)]
    pub private_key: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_target_branch() -> String {
    "main".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            bot_username: String::new(),
            bot_email: String::new(),
            target_branch: default_target_branch(),
            personal_access_token: None,
            app_id: None,
            installation_id: None,
            private_key_path: None,
            private_key: None,
        }
    }
}

/// How to authenticate against GitHub, resolved from [`GitHubSection`].
#[derive(Debug, Clone)]
pub enum GitHubAuthMode {
    Token(String),
    App {
        app_id: u64,
        installation_id: u64,
        private_key_pem: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSection {
    #[serde(default = "default_claude_cli")]
    pub cli_path: String,
    #[serde(default = "default_codegen_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
    /// Passed to `--allowedTools` when non-empty
    #[serde(default)]
    pub allowed_tools: String,
    /// Passed to `--disallowedTools` when non-empty
    #[serde(default)]
    pub disallowed_tools: String,
}

fn default_claude_cli() -> String {
    "claude".to_string()
}

fn default_codegen_timeout() -> u64 {
    300
}

impl Default for ClaudeSection {
    fn default() -> Self {
        Self {
            cli_path: default_claude_cli(),
            timeout_seconds: default_codegen_timeout(),
            dangerously_skip_permissions: false,
            allowed_tools: String::new(),
            disallowed_tools: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSection {
    #[serde(default = "default_gemini_cli")]
    pub cli_path: String,
    #[serde(default = "default_codegen_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub all_files: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub api_key: String,
}

fn default_gemini_cli() -> String {
    "gemini".to_string()
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            cli_path: default_gemini_cli(),
            timeout_seconds: default_codegen_timeout(),
            model: String::new(),
            all_files: false,
            sandbox: false,
            api_key: String::new(),
        }
    }
}

/// Polling for a freshly requested fork to become usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSection {
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval_seconds() -> u64 {
    5
}

impl Default for ForkSection {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Complete ticketsmith configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-ticket working copies are created under this directory
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub ai_provider: AiProvider,
    /// Ask the agent to write its repository guide (CLAUDE.md / GEMINI.md) when missing
    #[serde(default = "default_generate_context_file")]
    pub generate_context_file: bool,
    #[serde(default)]
    pub jira: JiraSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub claude: ClaudeSection,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub fork: ForkSection,
    #[serde(default)]
    pub server: ServerSection,
    /// Jira component name -> repository URL
    #[serde(default)]
    pub component_to_repo: BTreeMap<String, String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/ticketsmith")
}

fn default_generate_context_file() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            ai_provider: AiProvider::default(),
            generate_context_file: default_generate_context_file(),
            jira: JiraSection::default(),
            github: GitHubSection::default(),
            claude: ClaudeSection::default(),
            gemini: GeminiSection::default(),
            fork: ForkSection::default(),
            server: ServerSection::default(),
            component_to_repo: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ticketsmith config")
    }

    /// Load `path` if it exists (defaults otherwise), then apply environment overrides.
    pub fn load_layered(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("TICKETSMITH_WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = var("AI_PROVIDER").and_then(|v| v.parse().ok()) {
            self.ai_provider = v;
        }
        if let Some(v) = var("JIRA_BASE_URL") {
            self.jira.base_url = v;
        }
        if let Some(v) = var("JIRA_USERNAME") {
            self.jira.username = v;
        }
        if let Some(v) = var("JIRA_API_TOKEN") {
            self.jira.api_token = v;
        }
        if let Some(v) = var("GITHUB_BOT_USERNAME") {
            self.github.bot_username = v;
        }
        if let Some(v) = var("GITHUB_TOKEN") {
            self.github.personal_access_token = Some(v);
        }
        if let Some(v) = var("GITHUB_APP_PRIVATE_KEY") {
            self.github.private_key = Some(v);
        }
        if let Some(v) = var("CLAUDE_CMD") {
            self.claude.cli_path = v;
        }
        if let Some(v) = var("GEMINI_API_KEY") {
            self.gemini.api_key = v;
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.jira.interval_seconds)
    }

    pub fn fork_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fork.poll_interval_seconds)
    }

    /// Decide between app and token authentication.
    ///
    /// App credentials win when all three parts are present.
    pub fn github_auth_mode(&self) -> Result<GitHubAuthMode> {
        let gh = &self.github;
        if let (Some(app_id), Some(installation_id)) = (gh.app_id, gh.installation_id) {
            let private_key_pem = match (&gh.private_key, &gh.private_key_path) {
                (Some(pem), _) => pem.clone(),
                (None, Some(path)) => std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read GitHub App private key: {}", path.display())
                })?,
                (None, None) => anyhow::bail!(
                    "github.app_id is set but neither github.private_key nor github.private_key_path is"
                ),
            };
            return Ok(GitHubAuthMode::App {
                app_id,
                installation_id,
                private_key_pem,
            });
        }

        match &gh.personal_access_token {
            Some(token) if !token.is_empty() => Ok(GitHubAuthMode::Token(token.clone())),
            _ => anyhow::bail!(
                "No GitHub credentials: set github.app_id + github.installation_id + a private key, \
                 or github.personal_access_token / GITHUB_TOKEN"
            ),
        }
    }

    /// Check everything the scanners and pipelines rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.jira.base_url.is_empty() {
            problems.push("jira.base_url is required".to_string());
        }
        if self.jira.username.is_empty() {
            problems.push("jira.username is required".to_string());
        }
        if self.jira.api_token.is_empty() {
            problems.push("jira.api_token (or JIRA_API_TOKEN) is required".to_string());
        }
        if self.jira.interval_seconds == 0 {
            problems.push("jira.interval_seconds must be greater than zero".to_string());
        }

        let transitions = &self.jira.status_transitions;
        for (name, value) in [
            ("todo", &transitions.todo),
            ("in_progress", &transitions.in_progress),
            ("in_review", &transitions.in_review),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("jira.status_transitions.{} must not be empty", name));
            }
        }

        if self.github.bot_username.is_empty() {
            problems.push("github.bot_username is required".to_string());
        }
        if self.github.api_url.trim_end_matches('/') != default_api_url() {
            problems.push(format!(
                "github.api_url must be {}, only github.com is supported (got '{}')",
                default_api_url(),
                self.github.api_url
            ));
        }
        if self.github.target_branch.is_empty() {
            problems.push("github.target_branch must not be empty".to_string());
        }
        if let Err(e) = self.github_auth_mode() {
            problems.push(e.to_string());
        }

        if self.fork.poll_attempts == 0 {
            problems.push("fork.poll_attempts must be greater than zero".to_string());
        }
        if self.component_to_repo.is_empty() {
            problems.push("component_to_repo must map at least one component".to_string());
        }
        for (component, url) in &self.component_to_repo {
            if crate::models::parse_repository_url(url).is_err() {
                problems.push(format!(
                    "component_to_repo.{}: unsupported repository URL '{}'",
                    component, url
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }

    /// Copy with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |s: &mut String| {
            if !s.is_empty() {
                *s = REDACTED.to_string();
            }
        };
        hide(&mut copy.jira.api_token);
        hide(&mut copy.gemini.api_key);
        if let Some(token) = copy.github.personal_access_token.as_mut() {
            hide(token);
        }
        if let Some(key) = copy.github.private_key.as_mut() {
            hide(key);
        }
        copy
    }
}
