//! Feedback pipeline: apply unseen review feedback to an open pull request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{prompt, watermark};
use crate::clients::{CodeHostClient, IssueClient};
use crate::codegen::CodeGenClient;
use crate::config::Config;
use crate::errors::{PipelineError, PipelineStep};
use crate::models::{PrComment, PrDetail, RepositoryRef, Review, Ticket, parse_pull_request_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The ticket has no pull request URL yet.
    NoPullRequest,
    /// Nothing after the watermark warrants another pass.
    NoNewFeedback,
    Applied {
        committed: bool,
        watermark: DateTime<Utc>,
    },
}

/// Reviews and comments newer than the watermark, bot items excluded.
#[derive(Debug)]
pub struct NewFeedback<'a> {
    pub reviews: Vec<&'a Review>,
    pub comments: Vec<&'a PrComment>,
}

impl<'a> NewFeedback<'a> {
    pub fn select(detail: &'a PrDetail, watermark: DateTime<Utc>, bot_username: &str) -> Self {
        let reviews = detail
            .reviews
            .iter()
            .filter(|r| !watermark::is_bot(&r.author, bot_username))
            .filter(|r| watermark::is_after(r.submitted_at, watermark))
            .collect();
        let comments = detail
            .comments
            .iter()
            .filter(|c| !watermark::is_bot(&c.author, bot_username))
            .filter(|c| watermark::is_after(c.created_at, watermark))
            .collect();
        Self { reviews, comments }
    }

    /// Approvals and plain review re-submissions alone do not trigger a pass.
    pub fn warrants_processing(&self) -> bool {
        self.reviews.iter().any(|r| r.requests_changes()) || !self.comments.is_empty()
    }
}

/// Read a pull request URL out of a custom field that may hold either a
/// string or an array of strings.
pub fn pull_request_field_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.first().and_then(Value::as_str)?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub struct FeedbackPipeline {
    config: Arc<Config>,
    issues: Arc<dyn IssueClient>,
    code_host: Arc<dyn CodeHostClient>,
    codegen: Arc<dyn CodeGenClient>,
}

impl FeedbackPipeline {
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

    /// Process review feedback for ticket `key`. Safe to call repeatedly.
    pub async fn process(&self, key: &str) -> Result<FeedbackOutcome, PipelineError> {
        info!(ticket = key, "processing pull request feedback");
        match self.run(key).await {
            Ok(outcome) => {
                debug!(ticket = key, ?outcome, "feedback pass finished");
                Ok(outcome)
            }
            Err(err) => {
                error!(ticket = key, error = %err, "feedback pipeline failed");
                Err(err)
            }
        }
    }

    async fn run(&self, key: &str) -> Result<FeedbackOutcome, PipelineError> {
        let ticket = self
            .issues
            .fetch(key)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::FetchTicket, e))?;

        let Some(url) = self.pull_request_url(&ticket).await? else {
            info!(ticket = key, "no pull request linked to ticket");
            return Ok(FeedbackOutcome::NoPullRequest);
        };
        let pr = parse_pull_request_url(&url)?;
        let repo = RepositoryRef::new(&pr.owner, &pr.repo);

        let fetched_at = Utc::now();
        let detail = self
            .code_host
            .get_pr_detail(&repo, pr.number)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::FetchPullRequest, e))?;
        let conversation = self
            .code_host
            .list_pr_comments(&repo, pr.number)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::ListComments, e))?;

        let bot = &self.config.github.bot_username;
        let last_watermark = watermark::latest_watermark(&conversation, bot);

        let new = NewFeedback::select(&detail, last_watermark, bot);
        if !new.warrants_processing() {
            info!(
                ticket = key,
                pr = pr.number,
                new_reviews = new.reviews.len(),
                "no new change requests or comments"
            );
            return Ok(FeedbackOutcome::NoNewFeedback);
        }
        info!(
            ticket = key,
            pr = pr.number,
            new_reviews = new.reviews.len(),
            new_comments = new.comments.len(),
            "applying review feedback"
        );

        let digest = prompt::feedback_digest(&detail, last_watermark, bot);
        let clone_url = detail
            .head_clone_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::MissingHeadRepository)?;

        let dir = self.config.work_dir.join(format!("{}-feedback", key));
        let branch = &detail.head_branch;
        self.code_host
            .clone_repository(clone_url, &dir)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Clone, e))?;
        self.code_host
            .switch_branch(&dir, branch)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::SwitchBranch, e))?;
        self.code_host
            .pull(&dir, branch)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Pull, e))?;

        let output = self
            .codegen
            .generate(&prompt::feedback_prompt(&detail, &digest), &dir)
            .await?;
        if !output.success {
            return Err(PipelineError::CodeGeneration(format!(
                "agent reported failure: {}",
                output.content
            )));
        }

        let committed = self
            .code_host
            .commit(&dir, &prompt::feedback_commit_message(key))
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Commit, e))?;
        if committed {
            self.code_host
                .push(&dir, branch)
                .await
                .map_err(|e| PipelineError::step(PipelineStep::Push, e))?;
        } else {
            info!(ticket = key, "feedback produced no changes, nothing to push");
        }

        let next = watermark::next_watermark(fetched_at, last_watermark);
        if let Err(e) = self
            .code_host
            .add_pr_comment(&repo, pr.number, &watermark::marker_comment(next, key))
            .await
        {
            warn!(ticket = key, pr = pr.number, error = %e, "failed to record feedback watermark");
        }

        Ok(FeedbackOutcome::Applied {
            committed,
            watermark: next,
        })
    }

    async fn pull_request_url(&self, ticket: &Ticket) -> Result<Option<String>, PipelineError> {
        let field_name = self
            .config
            .jira
            .pr_field_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(PipelineError::MissingPrFieldName)?;
        let field_id = self
            .issues
            .resolve_field_id(field_name)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::ResolveField, e))?;
        Ok(ticket
            .fields
            .get(&field_id)
            .and_then(pull_request_field_value))
    }
}
