//! New-ticket pipeline: from a "to do" ticket to an open pull request.

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use super::prompt;
use crate::clients::{CodeHostClient, IssueClient};
use crate::codegen::CodeGenClient;
use crate::config::Config;
use crate::errors::{PipelineError, PipelineStep};
use crate::models::{NewPullRequest, PullRequestRef, RepositoryRef, Ticket, parse_repository_url};

/// Last step a ticket completed. Steps run strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TicketStage {
    Started,
    Fetched,
    RepoResolved,
    StatusUpdated,
    ForkEnsured,
    Cloned,
    BranchCreated,
    CodeGenerated,
    Committed,
    Pushed,
    PrCreated,
    TicketUpdated,
}

impl fmt::Display for TicketStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::Fetched => "fetched",
            Self::RepoResolved => "repo_resolved",
            Self::StatusUpdated => "status_updated",
            Self::ForkEnsured => "fork_ensured",
            Self::Cloned => "cloned",
            Self::BranchCreated => "branch_created",
            Self::CodeGenerated => "code_generated",
            Self::Committed => "committed",
            Self::Pushed => "pushed",
            Self::PrCreated => "pr_created",
            Self::TicketUpdated => "ticket_updated",
        };
        f.write_str(name)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct TicketRun {
    pub pull_request: PullRequestRef,
    /// `false` when the agent left the tree unchanged.
    pub committed: bool,
}

pub struct TicketPipeline {
    config: Arc<Config>,
    issues: Arc<dyn IssueClient>,
    code_host: Arc<dyn CodeHostClient>,
    codegen: Arc<dyn CodeGenClient>,
}

impl TicketPipeline {
    pub fn new(
        config: Arc<Config>,
        issues: Arc<dyn IssueClient>,
        code_host: Arc<dyn CodeHostClient>,
        codegen: Arc<dyn CodeGenClient>,
    ) -> Self {
        Self {
            config,
            issues,
            code_host,
            codegen,
        }
    }

    /// Drive ticket `key` to an open pull request.
    ///
    /// Any hard failure is reported on the ticket (unless error comments are
    /// disabled) and returned. Nothing is retried here; a ticket that failed
    /// before its status changed is picked up again by the next scan.
    pub async fn process(&self, key: &str) -> Result<TicketRun, PipelineError> {
        info!(ticket = key, "processing ticket");
        let mut stage = TicketStage::Started;

        match self.run(key, &mut stage).await {
            Ok(run) => {
                info!(
                    ticket = key,
                    pr = %run.pull_request.html_url,
                    committed = run.committed,
                    "ticket processed"
                );
                Ok(run)
            }
            Err(err) => {
                error!(ticket = key, stage = %stage, error = %err, "ticket pipeline failed");
                self.report_failure(key, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn run(&self, key: &str, stage: &mut TicketStage) -> Result<TicketRun, PipelineError> {
        let ticket = self
            .issues
            .fetch(key)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::FetchTicket, e))?;
        *stage = TicketStage::Fetched;

        let repo = self.resolve_repository(&ticket)?;
        debug!(ticket = key, repo = %repo, "resolved repository");
        *stage = TicketStage::RepoResolved;

        let transitions = &self.config.jira.status_transitions;
        self.update_status(key, &transitions.in_progress).await;
        *stage = TicketStage::StatusUpdated;

        let fork_url = self.ensure_fork(&repo).await?;
        *stage = TicketStage::ForkEnsured;

        let dir = self.config.work_dir.join(key);
        self.code_host
            .clone_repository(&fork_url, &dir)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Clone, e))?;
        *stage = TicketStage::Cloned;

        let target = &self.config.github.target_branch;
        self.code_host
            .switch_branch(&dir, target)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::SwitchBranch, e))?;
        let branch = key;
        self.code_host
            .create_branch(&dir, branch)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::CreateBranch, e))?;
        *stage = TicketStage::BranchCreated;

        if let Err(e) = self.codegen.ensure_context_file(&dir).await {
            warn!(ticket = key, error = %e, "could not generate agent context file");
        }
        let output = self
            .codegen
            .generate(&prompt::ticket_prompt(&ticket, &self.config.jira.username), &dir)
            .await?;
        if !output.success {
            return Err(PipelineError::CodeGeneration(format!(
                "agent reported failure: {}",
                output.content
            )));
        }
        *stage = TicketStage::CodeGenerated;

        let title = prompt::pr_title(key, &ticket.summary);
        let committed = self
            .code_host
            .commit(&dir, &title)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Commit, e))?;
        if !committed {
            info!(ticket = key, "agent made no changes, nothing to commit");
        }
        *stage = TicketStage::Committed;

        self.code_host
            .push(&dir, branch)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Push, e))?;
        *stage = TicketStage::Pushed;

        let request = NewPullRequest {
            title,
            body: prompt::pr_body(&ticket),
            head: prompt::pr_head(&self.config.github.bot_username, branch),
            base: target.clone(),
        };
        let pull_request = self
            .code_host
            .create_pull_request(&repo, &request)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::CreatePullRequest, e))?;
        info!(ticket = key, pr = %pull_request.html_url, "pull request created");
        *stage = TicketStage::PrCreated;

        self.record_pull_request(key, &pull_request).await;
        *stage = TicketStage::TicketUpdated;

        Ok(TicketRun {
            pull_request,
            committed,
        })
    }

    /// Only the first component is consulted.
    fn resolve_repository(&self, ticket: &Ticket) -> Result<RepositoryRef, PipelineError> {
        let component = ticket
            .components
            .first()
            .ok_or(PipelineError::NoComponents)?;
        let url = self
            .config
            .component_to_repo
            .get(component)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipelineError::NoRepositoryMapping {
                component: component.clone(),
            })?;
        parse_repository_url(url)
    }

    /// Return the clone URL of the bot's fork, creating it if needed.
    ///
    /// An existing fork has its target branch synced with upstream first; a
    /// fresh fork is already current. The first existence check counts
    /// toward `fork.poll_attempts`; after a fork is requested every further
    /// check waits `fork.poll_interval_seconds`.
    async fn ensure_fork(&self, repo: &RepositoryRef) -> Result<String, PipelineError> {
        let state = self
            .code_host
            .fork_exists(repo)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::CheckFork, e))?;
        if state.exists {
            debug!(repo = %repo, "fork already exists, syncing with upstream");
            self.code_host
                .sync_fork(repo, &self.config.github.target_branch)
                .await
                .map_err(|e| PipelineError::step(PipelineStep::SyncFork, e))?;
            return Ok(state
                .clone_url
                .unwrap_or_else(|| self.fork_url_fallback(repo)));
        }

        info!(repo = %repo, "creating fork");
        let requested_url = self
            .code_host
            .create_fork(repo)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::CreateFork, e))?;

        let attempts = self.config.fork.poll_attempts;
        let interval = self.config.fork_poll_interval();
        for attempt in 2..=attempts {
            tokio::time::sleep(interval).await;
            match self.code_host.fork_exists(repo).await {
                Ok(state) if state.exists => {
                    info!(repo = %repo, attempt, "fork is ready");
                    return Ok(state.clone_url.unwrap_or(requested_url));
                }
                Ok(_) => debug!(repo = %repo, attempt, "fork not ready yet"),
                Err(e) => warn!(repo = %repo, attempt, error = %e, "fork readiness check failed"),
            }
        }

        Err(PipelineError::ForkNotReady { attempts })
    }

    fn fork_url_fallback(&self, repo: &RepositoryRef) -> String {
        format!(
            "https://github.com/{}/{}.git",
            self.config.github.bot_username, repo.name
        )
    }

    /// Link the ticket to its pull request and move it to review. Best-effort.
    async fn record_pull_request(&self, key: &str, pull_request: &PullRequestRef) {
        if let Some(field_name) = self
            .config
            .jira
            .pr_field_name
            .as_deref()
            .filter(|n| !n.is_empty())
        {
            let updated = match self.issues.resolve_field_id(field_name).await {
                Ok(field_id) => {
                    self.issues
                        .update_field(key, &field_id, json!(pull_request.html_url))
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = updated {
                warn!(ticket = key, field = field_name, error = %e, "failed to store pull request URL");
            }
        }

        if let Err(e) = self
            .issues
            .add_comment(key, &prompt::success_comment(&pull_request.html_url))
            .await
        {
            warn!(ticket = key, error = %e, "failed to comment on ticket");
        }

        self.update_status(key, &self.config.jira.status_transitions.in_review)
            .await;
    }

    async fn update_status(&self, key: &str, status: &str) {
        if let Err(e) = self.issues.update_status(key, status).await {
            warn!(ticket = key, status, error = %e, "failed to update ticket status");
        }
    }

    async fn report_failure(&self, key: &str, message: &str) {
        if self.config.jira.disable_error_comments {
            info!(ticket = key, "error comments disabled, not reporting failure");
            return;
        }
        if let Err(e) = self
            .issues
            .add_comment(key, &prompt::failure_comment(message))
            .await
        {
            warn!(ticket = key, error = %e, "failed to report failure on ticket");
        }
    }
}
