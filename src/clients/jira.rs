//! Jira REST v2 client.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;

use super::IssueClient;
use crate::models::{Ticket, TicketComment};

const SEARCH_PAGE_SIZE: u64 = 100;

/// Fields requested by `search`. Pipelines re-fetch the full ticket anyway.
const SEARCH_FIELDS: &[&str] = &["summary", "description", "status", "components", "updated"];

/// A raw issue as returned by `/rest/api/2/issue/{key}` and `/search`.
#[derive(Debug, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    to: TransitionTarget,
}

#[derive(Debug, Deserialize)]
struct TransitionTarget {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FieldDefinition {
    id: String,
    name: String,
}

pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    field_ids: RwLock<HashMap<String, String>>,
}

impl JiraClient {
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            field_ids: RwLock::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/json")
    }
}

/// Send a request and turn a non-2xx status into an error carrying the body.
async fn send(request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let resp = request
        .send()
        .await
        .with_context(|| format!("Failed to send {} request to Jira", what))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Jira {} returned {}: {}", what, status, body);
    }
    Ok(resp)
}

#[async_trait]
impl IssueClient for JiraClient {
    async fn fetch(&self, key: &str) -> Result<Ticket> {
        let issue: JiraIssue = send(
            self.request(reqwest::Method::GET, &format!("issue/{}", key)),
            "issue",
        )
        .await?
        .json()
        .await
        .context("Failed to parse Jira issue")?;
        Ok(ticket_from_issue(issue))
    }

    async fn search(&self, query: &str) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::new();
        let mut start_at = 0u64;

        loop {
            let page: SearchResponse = send(
                self.request(reqwest::Method::POST, "search").json(&json!({
                    "jql": query,
                    "startAt": start_at,
                    "maxResults": SEARCH_PAGE_SIZE,
                    "fields": SEARCH_FIELDS,
                })),
                "search",
            )
            .await?
            .json()
            .await
            .context("Failed to parse Jira search response")?;

            let count = page.issues.len() as u64;
            tickets.extend(page.issues.into_iter().map(ticket_from_issue));
            start_at += count;
            if count == 0 || start_at >= page.total {
                break;
            }
        }

        debug!(query, count = tickets.len(), "jira search complete");
        Ok(tickets)
    }

    async fn update_status(&self, key: &str, status: &str) -> Result<()> {
        let path = format!("issue/{}/transitions", key);
        let available: TransitionsResponse = send(
            self.request(reqwest::Method::GET, &path),
            "transitions",
        )
        .await?
        .json()
        .await
        .context("Failed to parse Jira transitions")?;

        let transition_id = pick_transition(&available.transitions, status)?;
        send(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "transition": { "id": transition_id } })),
            "transition",
        )
        .await?;
        Ok(())
    }

    async fn update_field(&self, key: &str, field_id: &str, value: Value) -> Result<()> {
        send(
            self.request(reqwest::Method::PUT, &format!("issue/{}", key))
                .json(&json!({ "fields": { field_id: value } })),
            "field update",
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<()> {
        send(
            self.request(reqwest::Method::POST, &format!("issue/{}/comment", key))
                .json(&json!({ "body": text })),
            "comment",
        )
        .await?;
        Ok(())
    }

    async fn resolve_field_id(&self, name: &str) -> Result<String> {
        if name.starts_with("customfield_") {
            return Ok(name.to_string());
        }
        let lookup = name.to_lowercase();
        if let Some(id) = self.field_ids.read().await.get(&lookup) {
            return Ok(id.clone());
        }

        let fields: Vec<FieldDefinition> =
            send(self.request(reqwest::Method::GET, "field"), "field list")
                .await?
                .json()
                .await
                .context("Failed to parse Jira field list")?;

        let mut cache = self.field_ids.write().await;
        for field in fields {
            cache.insert(field.name.to_lowercase(), field.id);
        }
        cache
            .get(&lookup)
            .cloned()
            .with_context(|| format!("Jira field not found: {}", name))
    }
}

fn pick_transition(transitions: &[Transition], status: &str) -> Result<String> {
    transitions
        .iter()
        .find(|t| t.to.name.eq_ignore_ascii_case(status))
        .map(|t| t.id.clone())
        .with_context(|| {
            let targets: Vec<&str> = transitions.iter().map(|t| t.to.name.as_str()).collect();
            format!(
                "No transition to status '{}' (available: {})",
                status,
                targets.join(", ")
            )
        })
}

/// Jira emits `2024-01-15T10:30:00.000+0000`; RFC 3339 is accepted too.
pub fn parse_jira_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn str_field(fields: &serde_json::Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn ticket_from_issue(issue: JiraIssue) -> Ticket {
    let fields = issue.fields;

    let components = fields
        .get("components")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|c| c.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let comments = fields
        .get("comment")
        .and_then(|c| c.get("comments"))
        .and_then(Value::as_array)
        .map(|list| list.iter().map(comment_from_value).collect())
        .unwrap_or_default();

    Ticket {
        key: issue.key,
        summary: str_field(&fields, "summary"),
        description: str_field(&fields, "description"),
        components,
        comments,
        fields: fields.into_iter().collect(),
    }
}

fn comment_from_value(value: &Value) -> TicketComment {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();
    let author = value.get("author");
    TicketComment {
        author: text(author.and_then(|a| a.get("name"))),
        author_display_name: text(author.and_then(|a| a.get("displayName"))),
        body: text(value.get("body")),
        created: value
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_jira_timestamp),
    }
}
