//! Wiring: real collaborators, pipelines and scanners built from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::clients::github::{GitHubAuth, GitHubClient};
use crate::clients::jira::JiraClient;
use crate::clients::{CodeHostClient, IssueClient};
use crate::codegen::{self, CodeGenClient};
use crate::config::{Config, GitHubAuthMode};
use crate::credentials::{CredentialCache, GitHubAppExchanger};
use crate::pipeline::{FeedbackPipeline, TicketPipeline};
use crate::scanner::{self, Scanner};

pub struct Services {
    pub config: Arc<Config>,
    pub issues: Arc<dyn IssueClient>,
    pub code_host: Arc<dyn CodeHostClient>,
    pub codegen: Arc<dyn CodeGenClient>,
}

impl Services {
    pub fn from_config(config: Config) -> Result<Self> {
        let auth = match config.github_auth_mode()? {
            GitHubAuthMode::Token(token) => {
                info!("authenticating to GitHub with a personal access token");
                GitHubAuth::Token(token)
            }
            GitHubAuthMode::App {
                app_id,
                installation_id,
                private_key_pem,
            } => {
                info!(app_id, installation_id, "authenticating to GitHub as an app installation");
                let exchanger = GitHubAppExchanger::new(
                    &config.github.api_url,
                    app_id,
                    installation_id,
                    &private_key_pem,
                )
                .context("Failed to load GitHub App credentials")?;
                GitHubAuth::App(Arc::new(CredentialCache::new(exchanger)))
            }
        };

        let issues = Arc::new(JiraClient::new(
            &config.jira.base_url,
            &config.jira.api_token,
        ));
        let code_host = Arc::new(GitHubClient::new(
            &config.github.api_url,
            auth,
            &config.github.bot_username,
            &config.github.bot_email,
        ));
        let codegen = codegen::build_client(&config);
        info!(provider = %config.ai_provider, "code generation backend selected");

        Ok(Self {
            config: Arc::new(config),
            issues,
            code_host,
            codegen,
        })
    }

    pub fn ticket_pipeline(&self) -> TicketPipeline {
        TicketPipeline::new(
            Arc::clone(&self.config),
            Arc::clone(&self.issues),
            Arc::clone(&self.code_host),
            Arc::clone(&self.codegen),
        )
    }

    pub fn feedback_pipeline(&self) -> FeedbackPipeline {
        FeedbackPipeline::new(
            Arc::clone(&self.config),
            Arc::clone(&self.issues),
            Arc::clone(&self.code_host),
            Arc::clone(&self.codegen),
        )
    }

    /// The ticket scanner, plus the feedback scanner when a PR field is configured.
    pub fn scanners(&self) -> Vec<Arc<Scanner>> {
        let interval = self.config.scan_interval();
        let mut scanners = vec![Arc::new(Scanner::new(
            "tickets",
            scanner::ticket_query(&self.config),
            interval,
            Arc::clone(&self.issues),
            Arc::new(self.ticket_pipeline()),
        ))];

        match scanner::feedback_query(&self.config) {
            Some(query) => scanners.push(Arc::new(Scanner::new(
                "feedback",
                query,
                interval,
                Arc::clone(&self.issues),
                Arc::new(self.feedback_pipeline()),
            ))),
            None => warn!("jira.pr_field_name is not set, feedback scanner disabled"),
        }
        scanners
    }
}
