//! Issue tracker and code host collaborators.
//!
//! The pipelines only talk to these traits. Real implementations live in
//! [`jira`] and [`github`]; tests use the recording fakes in `crate::testing`.

pub mod git;
pub mod github;
pub mod jira;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ForkState, NewPullRequest, PrComment, PrDetail, PullRequestRef, RepositoryRef, Ticket,
};

/// Issue tracker operations.
/// Real implementation: `JiraClient`. Test double: `FakeIssueClient`.
#[async_trait]
pub trait IssueClient: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Ticket>;

    async fn search(&self, query: &str) -> Result<Vec<Ticket>>;

    /// Move the ticket to the named status via whatever transition reaches it.
    async fn update_status(&self, key: &str, status: &str) -> Result<()>;

    async fn update_field(&self, key: &str, field_id: &str, value: serde_json::Value)
    -> Result<()>;

    async fn add_comment(&self, key: &str, text: &str) -> Result<()>;

    /// Map a human-readable field name to the tracker's field ID.
    async fn resolve_field_id(&self, name: &str) -> Result<String>;
}

/// Code host operations: forks, working copies and pull requests.
/// Real implementation: `GitHubClient`. Test double: `FakeCodeHost`.
#[async_trait]
pub trait CodeHostClient: Send + Sync {
    /// Whether the bot account already owns a fork of `repo`.
    async fn fork_exists(&self, repo: &RepositoryRef) -> Result<ForkState>;

    /// Request a fork; returns its clone URL. The fork may not be usable yet.
    async fn create_fork(&self, repo: &RepositoryRef) -> Result<String>;

    /// Fast-forward `branch` of the bot's fork to upstream `repo`.
    async fn sync_fork(&self, repo: &RepositoryRef, branch: &str) -> Result<()>;

    /// Clone `url` into `dir`, or refresh `dir` in place if it is already a clone.
    async fn clone_repository(&self, url: &str, dir: &Path) -> Result<()>;

    /// Check out `branch` and reset it to the remote's latest.
    async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<()>;

    async fn pull(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Create `name` from the current HEAD, replacing any local branch of that name.
    async fn create_branch(&self, dir: &Path, name: &str) -> Result<()>;

    /// Commit all changes. Returns `false` when the tree was clean.
    async fn commit(&self, dir: &Path, message: &str) -> Result<bool>;

    async fn push(&self, dir: &Path, branch: &str) -> Result<()>;

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        request: &NewPullRequest,
    ) -> Result<PullRequestRef>;

    async fn get_pr_detail(&self, repo: &RepositoryRef, number: u64) -> Result<PrDetail>;

    /// Conversation comments on the PR.
    async fn list_pr_comments(&self, repo: &RepositoryRef, number: u64) -> Result<Vec<PrComment>>;

    async fn add_pr_comment(&self, repo: &RepositoryRef, number: u64, body: &str) -> Result<()>;
}
