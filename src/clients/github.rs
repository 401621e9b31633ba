//! GitHub REST client plus git working-copy operations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::CodeHostClient;
use super::git;
use crate::credentials::CredentialCache;
use crate::models::{
    ForkState, NewPullRequest, PrComment, PrDetail, PrFile, PullRequestRef, RepositoryRef, Review,
    parse_repository_url,
};

const PAGE_SIZE: usize = 100;

/// How the client authenticates against GitHub.
pub enum GitHubAuth {
    /// A personal access token, used as-is.
    Token(String),
    /// A GitHub App installation token, refreshed through the cache.
    App(Arc<CredentialCache>),
}

impl GitHubAuth {
    pub async fn token(&self) -> Result<String> {
        match self {
            Self::Token(token) => Ok(token.clone()),
            Self::App(cache) => cache
                .get_token()
                .await
                .context("Failed to obtain GitHub installation token"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoParent {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    fork: bool,
    clone_url: String,
    #[serde(default)]
    parent: Option<RepoParent>,
    #[serde(default)]
    source: Option<RepoParent>,
}

#[derive(Debug, Deserialize)]
struct HeadRepo {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    branch: String,
    #[serde(default)]
    repo: Option<HeadRepo>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    user: Option<UserRef>,
    state: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    user: Option<UserRef>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<u64>,
    #[serde(default)]
    original_line: Option<u64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    filename: String,
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    patch: Option<String>,
}

fn login(user: Option<UserRef>) -> String {
    user.map(|u| u.login).unwrap_or_default()
}

impl From<ReviewResponse> for Review {
    fn from(r: ReviewResponse) -> Self {
        Review {
            author: login(r.user),
            state: r.state,
            body: r.body.unwrap_or_default(),
            submitted_at: r.submitted_at,
        }
    }
}

impl From<CommentResponse> for PrComment {
    fn from(c: CommentResponse) -> Self {
        PrComment {
            author: login(c.user),
            body: c.body.unwrap_or_default(),
            path: c.path,
            line: c.line.or(c.original_line),
            created_at: c.created_at,
        }
    }
}

impl From<FileResponse> for PrFile {
    fn from(f: FileResponse) -> Self {
        PrFile {
            filename: f.filename,
            status: f.status,
            additions: f.additions,
            deletions: f.deletions,
            patch: f.patch,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MergeUpstreamResponse {
    #[serde(default)]
    merge_type: Option<String>,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    auth: GitHubAuth,
    bot_username: String,
    bot_email: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, auth: GitHubAuth, bot_username: &str, bot_email: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            auth,
            bot_username: bot_username.to_string(),
            bot_email: bot_email.to_string(),
        }
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.auth.token().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ticketsmith"))
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to GitHub", what))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub {} returned {}: {}", what, status, body);
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let request = self.request(reqwest::Method::GET, path).await?;
        self.send(request, what)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse GitHub {} response", what))
    }

    /// GET every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let request = self
                .request(reqwest::Method::GET, path)
                .await?
                .query(&[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())]);
            let items: Vec<T> = self
                .send(request, what)
                .await?
                .json()
                .await
                .with_context(|| format!("Failed to parse GitHub {} response", what))?;

            let count = items.len();
            all.extend(items);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    /// Point `origin` at an authenticated URL built from a current token.
    async fn authenticate_origin(&self, dir: &Path, repo: &RepositoryRef) -> Result<()> {
        let token = self.auth.token().await?;
        let remote = git::authenticated_remote(&repo.owner, &repo.name, &token);
        git::run(dir, &["remote", "set-url", "origin", &remote]).await?;
        Ok(())
    }

    async fn configure_identity(&self, dir: &Path) -> Result<()> {
        git::run(dir, &["config", "user.name", &self.bot_username]).await?;
        git::run(dir, &["config", "user.email", &self.bot_email]).await?;
        Ok(())
    }
}

#[async_trait]
impl CodeHostClient for GitHubClient {
    async fn fork_exists(&self, repo: &RepositoryRef) -> Result<ForkState> {
        let path = format!("/repos/{}/{}", self.bot_username, repo.name);
        let request = self.request(reqwest::Method::GET, &path).await?;
        let resp = request
            .send()
            .await
            .context("Failed to send fork lookup request to GitHub")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ForkState::absent());
        }
        let candidate: RepoResponse = resp
            .error_for_status()
            .context("GitHub fork lookup returned error status")?
            .json()
            .await
            .context("Failed to parse GitHub repository response")?;

        let upstream = repo.full_name();
        let forked_from_upstream = [&candidate.parent, &candidate.source]
            .into_iter()
            .flatten()
            .any(|p| p.full_name.eq_ignore_ascii_case(&upstream));

        if candidate.fork && forked_from_upstream {
            Ok(ForkState::ready(candidate.clone_url))
        } else {
            warn!(
                repo = %upstream,
                "{}/{} exists but is not a fork of the target repository",
                self.bot_username,
                repo.name
            );
            Ok(ForkState::absent())
        }
    }

    async fn create_fork(&self, repo: &RepositoryRef) -> Result<String> {
        let path = format!("/repos/{}/{}/forks", repo.owner, repo.name);
        let request = self
            .request(reqwest::Method::POST, &path)
            .await?
            .json(&json!({}));
        let fork: RepoResponse = self
            .send(request, "fork")
            .await?
            .json()
            .await
            .context("Failed to parse GitHub fork response")?;
        info!(repo = %repo, clone_url = %fork.clone_url, "requested fork");
        Ok(fork.clone_url)
    }

    async fn sync_fork(&self, repo: &RepositoryRef, branch: &str) -> Result<()> {
        let path = format!("/repos/{}/{}/merge-upstream", self.bot_username, repo.name);
        let request = self
            .request(reqwest::Method::POST, &path)
            .await?
            .json(&json!({ "branch": branch }));
        let merged: MergeUpstreamResponse = self
            .send(request, "fork sync")
            .await?
            .json()
            .await
            .context("Failed to parse GitHub fork sync response")?;
        info!(
            repo = %repo,
            branch,
            merge_type = merged.merge_type.as_deref().unwrap_or("none"),
            "synced fork with upstream"
        );
        Ok(())
    }

    async fn clone_repository(&self, url: &str, dir: &Path) -> Result<()> {
        let repo = parse_repository_url(url)?;

        if dir.join(".git").exists() {
            debug!(dir = %dir.display(), "refreshing existing clone");
            self.authenticate_origin(dir, &repo).await?;
            git::reset_to_remote_default(dir).await?;
        } else {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to remove stale {}", dir.display()))?;
            }
            let parent = dir
                .parent()
                .with_context(|| format!("{} has no parent directory", dir.display()))?;
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;

            let token = self.auth.token().await?;
            let remote = git::authenticated_remote(&repo.owner, &repo.name, &token);
            let target = dir.to_string_lossy();
            git::run(parent, &["clone", &remote, &target]).await?;
        }

        self.configure_identity(dir).await
    }

    async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        let remote_branch = format!("origin/{}", branch);
        git::run(dir, &["fetch", "origin"]).await?;
        git::run(dir, &["checkout", "-B", branch, &remote_branch]).await?;
        git::run(dir, &["reset", "--hard", &remote_branch]).await?;
        Ok(())
    }

    async fn pull(&self, dir: &Path, branch: &str) -> Result<()> {
        git::run(dir, &["pull", "--ff-only", "origin", branch]).await?;
        Ok(())
    }

    async fn create_branch(&self, dir: &Path, name: &str) -> Result<()> {
        let local_ref = format!("refs/heads/{}", name);
        if git::succeeds(dir, &["show-ref", "--verify", "--quiet", &local_ref]).await? {
            debug!(branch = name, "deleting stale local branch");
            git::run(dir, &["branch", "-D", name]).await?;
        }
        git::run(dir, &["checkout", "-b", name]).await?;
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<bool> {
        git::run(dir, &["add", "-A"]).await?;
        let status = git::run(dir, &["status", "--porcelain"]).await?;
        if status.is_empty() {
            return Ok(false);
        }
        git::run(dir, &["commit", "-m", message]).await?;
        Ok(true)
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<()> {
        let origin = git::run(dir, &["remote", "get-url", "origin"]).await?;
        let repo = parse_repository_url(&origin)?;
        // Installation tokens expire, so the remote is re-authenticated per push
        self.authenticate_origin(dir, &repo).await?;
        git::run(dir, &["push", "--force-with-lease", "-u", "origin", branch]).await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        request: &NewPullRequest,
    ) -> Result<PullRequestRef> {
        let path = format!("/repos/{}/{}/pulls", repo.owner, repo.name);
        let builder = self.request(reqwest::Method::POST, &path).await?.json(&json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
        }));
        let pr: PullResponse = self
            .send(builder, "pull request")
            .await?
            .json()
            .await
            .context("Failed to parse GitHub pull request response")?;

        Ok(PullRequestRef {
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            number: pr.number,
            html_url: pr.html_url,
            head_branch: pr.head.branch,
            head_clone_url: pr.head.repo.map(|r| r.clone_url),
        })
    }

    async fn get_pr_detail(&self, repo: &RepositoryRef, number: u64) -> Result<PrDetail> {
        let base = format!("/repos/{}/{}", repo.owner, repo.name);
        let pr_path = format!("{}/pulls/{}", base, number);
        let reviews_path = format!("{}/reviews", pr_path);
        let inline_path = format!("{}/comments", pr_path);
        let files_path = format!("{}/files", pr_path);

        let (pr, reviews, inline, conversation, files) = futures::try_join!(
            self.get_json::<PullResponse>(&pr_path, "pull request"),
            self.get_all::<ReviewResponse>(&reviews_path, "reviews"),
            self.get_all::<CommentResponse>(&inline_path, "review comments"),
            self.list_pr_comments(repo, number),
            self.get_all::<FileResponse>(&files_path, "files"),
        )?;

        let mut comments: Vec<PrComment> = inline.into_iter().map(PrComment::from).collect();
        comments.extend(conversation);

        Ok(PrDetail {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            html_url: pr.html_url,
            head_branch: pr.head.branch,
            head_clone_url: pr.head.repo.map(|r| r.clone_url),
            reviews: reviews.into_iter().map(Review::from).collect(),
            comments,
            files: files.into_iter().map(PrFile::from).collect(),
        })
    }

    async fn list_pr_comments(&self, repo: &RepositoryRef, number: u64) -> Result<Vec<PrComment>> {
        let path = format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.name, number);
        let comments: Vec<CommentResponse> = self.get_all(&path, "issue comments").await?;
        Ok(comments.into_iter().map(PrComment::from).collect())
    }

    async fn add_pr_comment(&self, repo: &RepositoryRef, number: u64, body: &str) -> Result<()> {
        let path = format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.name, number);
        let request = self
            .request(reqwest::Method::POST, &path)
            .await?
            .json(&json!({ "body": body }));
        self.send(request, "comment").await?;
        Ok(())
    }
}
