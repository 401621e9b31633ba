//! Recording fakes for the pipeline collaborators.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::clients::{CodeHostClient, IssueClient};
use crate::codegen::CodeGenClient;
use crate::config::Config;
use crate::errors::CodeGenError;
use crate::models::{
    CodeGenOutput, ForkState, NewPullRequest, PrComment, PrDetail, PullRequestRef, RepositoryRef,
    Ticket,
};

pub const PR_FIELD_ID: &str = "customfield_10100";

/// Configuration the fakes are written against.
pub fn test_config() -> Config {
    let mut config = Config {
        work_dir: PathBuf::from("/tmp/ticketsmith-test"),
        ..Config::default()
    };
    config.jira.base_url = "https://jira.example.com".into();
    config.jira.username = "jira-bot".into();
    config.jira.api_token = "jira-token".into();
    config.jira.pr_field_name = Some("Git Pull Request".into());
    config.github.bot_username = "test-bot".into();
    config.github.bot_email = "test-bot@example.com".into();
    config.github.personal_access_token = Some("ghp_test".into());
    config
        .component_to_repo
        .insert("frontend".into(), "https://github.com/example/repo.git".into());
    config
}

pub fn sample_ticket() -> Ticket {
    Ticket {
        key: "TEST-123".into(),
        summary: "Test ticket".into(),
        description: "The login button does nothing".into(),
        components: vec!["frontend".into()],
        ..Default::default()
    }
}

// ── issue tracker ──

#[derive(Debug, Clone, PartialEq)]
pub enum IssueCall {
    Fetch(String),
    Search(String),
    UpdateStatus { key: String, status: String },
    UpdateField { key: String, field_id: String, value: Value },
    AddComment { key: String, text: String },
    ResolveField(String),
}

#[derive(Default)]
pub struct FakeIssueClient {
    tickets: Mutex<HashMap<String, Ticket>>,
    search_results: Mutex<Vec<Ticket>>,
    calls: Mutex<Vec<IssueCall>>,
    pub fail_fetch: AtomicBool,
    pub fail_search: AtomicBool,
    pub fail_status: AtomicBool,
    pub fail_comment: AtomicBool,
    pub fail_resolve_field: AtomicBool,
}

impl FakeIssueClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        self.tickets
            .lock()
            .unwrap()
            .insert(ticket.key.clone(), ticket);
        self
    }

    pub fn set_search_results(&self, tickets: Vec<Ticket>) {
        *self.search_results.lock().unwrap() = tickets;
    }

    pub fn calls(&self) -> Vec<IssueCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                IssueCall::UpdateStatus { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn comments(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                IssueCall::AddComment { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn field_updates(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                IssueCall::UpdateField {
                    field_id, value, ..
                } => Some((field_id, value)),
                _ => None,
            })
            .collect()
    }

    pub fn search_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, IssueCall::Search(_)))
            .count()
    }

    fn record(&self, call: IssueCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl IssueClient for FakeIssueClient {
    async fn fetch(&self, key: &str) -> Result<Ticket> {
        self.record(IssueCall::Fetch(key.to_string()));
        if self.fail_fetch.load(Ordering::SeqCst) {
            bail!("jira unavailable");
        }
        self.tickets
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("Issue {} does not exist", key))
    }

    async fn search(&self, query: &str) -> Result<Vec<Ticket>> {
        self.record(IssueCall::Search(query.to_string()));
        if self.fail_search.load(Ordering::SeqCst) {
            bail!("search failed");
        }
        Ok(self.search_results.lock().unwrap().clone())
    }

    async fn update_status(&self, key: &str, status: &str) -> Result<()> {
        self.record(IssueCall::UpdateStatus {
            key: key.to_string(),
            status: status.to_string(),
        });
        if self.fail_status.load(Ordering::SeqCst) {
            bail!("no transition to {}", status);
        }
        Ok(())
    }

    async fn update_field(&self, key: &str, field_id: &str, value: Value) -> Result<()> {
        self.record(IssueCall::UpdateField {
            key: key.to_string(),
            field_id: field_id.to_string(),
            value,
        });
        Ok(())
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<()> {
        self.record(IssueCall::AddComment {
            key: key.to_string(),
            text: text.to_string(),
        });
        if self.fail_comment.load(Ordering::SeqCst) {
            bail!("comment rejected");
        }
        Ok(())
    }

    async fn resolve_field_id(&self, name: &str) -> Result<String> {
        self.record(IssueCall::ResolveField(name.to_string()));
        if self.fail_resolve_field.load(Ordering::SeqCst) {
            bail!("field {} not found", name);
        }
        Ok(PR_FIELD_ID.to_string())
    }
}

// ── code host ──

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ForkExists(String),
    CreateFork(String),
    SyncFork { repo: String, branch: String },
    Clone { url: String, dir: PathBuf },
    SwitchBranch(String),
    Pull(String),
    CreateBranch(String),
    Commit(String),
    Push(String),
    CreatePullRequest(NewPullRequest),
    GetPrDetail(u64),
    ListPrComments(u64),
    AddPrComment(String),
}

impl HostCall {
    fn name(&self) -> &'static str {
        match self {
            Self::ForkExists(_) => "fork_exists",
            Self::CreateFork(_) => "create_fork",
            Self::SyncFork { .. } => "sync_fork",
            Self::Clone { .. } => "clone",
            Self::SwitchBranch(_) => "switch_branch",
            Self::Pull(_) => "pull",
            Self::CreateBranch(_) => "create_branch",
            Self::Commit(_) => "commit",
            Self::Push(_) => "push",
            Self::CreatePullRequest(_) => "create_pull_request",
            Self::GetPrDetail(_) => "get_pr_detail",
            Self::ListPrComments(_) => "list_pr_comments",
            Self::AddPrComment(_) => "add_pr_comment",
        }
    }
}

pub struct FakeCodeHost {
    /// Existence checks that report "absent" before the fork shows up.
    /// `None` means the fork never appears.
    fork_ready_after: Option<usize>,
    fork_checks: AtomicUsize,
    calls: Mutex<Vec<HostCall>>,
    pr_detail: Mutex<Option<PrDetail>>,
    pr_comments: Mutex<Vec<PrComment>>,
    pub commit_has_changes: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
}

impl Default for FakeCodeHost {
    fn default() -> Self {
        Self {
            fork_ready_after: Some(0),
            fork_checks: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            pr_detail: Mutex::new(None),
            pr_comments: Mutex::new(Vec::new()),
            commit_has_changes: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeCodeHost {
    /// The fork already exists.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fork_ready_after(checks: Option<usize>) -> Self {
        Self {
            fork_ready_after: checks,
            ..Self::default()
        }
    }

    pub fn with_pr(self, detail: PrDetail, comments: Vec<PrComment>) -> Self {
        *self.pr_detail.lock().unwrap() = Some(detail);
        *self.pr_comments.lock().unwrap() = comments;
        self
    }

    /// Make the named operation (e.g. `"push"`) fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.calls().iter().map(HostCall::name).collect()
    }

    pub fn fork_checks(&self) -> usize {
        self.fork_checks.load(Ordering::SeqCst)
    }

    pub fn pull_requests(&self) -> Vec<NewPullRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::CreatePullRequest(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn pr_comments_added(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::AddPrComment(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) -> Result<()> {
        let name = call.name();
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(name) {
            bail!("{} failed", name);
        }
        Ok(())
    }
}

#[async_trait]
impl CodeHostClient for FakeCodeHost {
    async fn fork_exists(&self, repo: &RepositoryRef) -> Result<ForkState> {
        self.record(HostCall::ForkExists(repo.full_name()))?;
        let previous_checks = self.fork_checks.fetch_add(1, Ordering::SeqCst);
        match self.fork_ready_after {
            Some(after) if previous_checks >= after => Ok(ForkState::ready(format!(
                "https://github.com/test-bot/{}.git",
                repo.name
            ))),
            _ => Ok(ForkState::absent()),
        }
    }

    async fn create_fork(&self, repo: &RepositoryRef) -> Result<String> {
        self.record(HostCall::CreateFork(repo.full_name()))?;
        Ok(format!("https://github.com/test-bot/{}.git", repo.name))
    }

    async fn sync_fork(&self, repo: &RepositoryRef, branch: &str) -> Result<()> {
        self.record(HostCall::SyncFork {
            repo: repo.full_name(),
            branch: branch.to_string(),
        })
    }

    async fn clone_repository(&self, url: &str, dir: &Path) -> Result<()> {
        self.record(HostCall::Clone {
            url: url.to_string(),
            dir: dir.to_path_buf(),
        })
    }

    async fn switch_branch(&self, _dir: &Path, branch: &str) -> Result<()> {
        self.record(HostCall::SwitchBranch(branch.to_string()))
    }

    async fn pull(&self, _dir: &Path, branch: &str) -> Result<()> {
        self.record(HostCall::Pull(branch.to_string()))
    }

    async fn create_branch(&self, _dir: &Path, name: &str) -> Result<()> {
        self.record(HostCall::CreateBranch(name.to_string()))
    }

    async fn commit(&self, _dir: &Path, message: &str) -> Result<bool> {
        self.record(HostCall::Commit(message.to_string()))?;
        Ok(self.commit_has_changes.load(Ordering::SeqCst))
    }

    async fn push(&self, _dir: &Path, branch: &str) -> Result<()> {
        self.record(HostCall::Push(branch.to_string()))
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        request: &NewPullRequest,
    ) -> Result<PullRequestRef> {
        self.record(HostCall::CreatePullRequest(request.clone()))?;
        let head_branch = request
            .head
            .split_once(':')
            .map_or(request.head.as_str(), |(_, b)| b);
        Ok(PullRequestRef {
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            number: 42,
            html_url: format!("https://github.com/{}/pull/42", repo.full_name()),
            head_branch: head_branch.to_string(),
            head_clone_url: None,
        })
    }

    async fn get_pr_detail(&self, _repo: &RepositoryRef, number: u64) -> Result<PrDetail> {
        self.record(HostCall::GetPrDetail(number))?;
        self.pr_detail
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("pull request {} not found", number))
    }

    async fn list_pr_comments(&self, _repo: &RepositoryRef, number: u64) -> Result<Vec<PrComment>> {
        self.record(HostCall::ListPrComments(number))?;
        Ok(self.pr_comments.lock().unwrap().clone())
    }

    async fn add_pr_comment(&self, _repo: &RepositoryRef, _number: u64, body: &str) -> Result<()> {
        self.record(HostCall::AddPrComment(body.to_string()))
    }
}

// ── code generation ──

#[derive(Default)]
pub struct FakeCodeGen {
    prompts: Mutex<Vec<String>>,
    context_checks: AtomicUsize,
    pub fail: AtomicBool,
    pub unsuccessful: AtomicBool,
    pub fail_context: AtomicBool,
}

impl FakeCodeGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn context_checks(&self) -> usize {
        self.context_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenClient for FakeCodeGen {
    async fn generate(&self, prompt: &str, _work_dir: &Path) -> Result<CodeGenOutput, CodeGenError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CodeGenError::Timeout { secs: 300 });
        }
        Ok(CodeGenOutput {
            success: !self.unsuccessful.load(Ordering::SeqCst),
            content: "Done".into(),
        })
    }

    async fn ensure_context_file(&self, _work_dir: &Path) -> Result<(), CodeGenError> {
        self.context_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_context.load(Ordering::SeqCst) {
            return Err(CodeGenError::NoResult);
        }
        Ok(())
    }
}
