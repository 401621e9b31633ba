//! Text the pipelines send to the agent, Jira and GitHub.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::watermark::{is_after, is_bot};
use crate::models::{PrDetail, Ticket};

/// Title shared by the commit and the pull request.
pub fn pr_title(ticket_key: &str, summary: &str) -> String {
    format!("{}: {}", ticket_key, summary)
}

/// Fork-qualified head reference.
pub fn pr_head(bot_username: &str, branch: &str) -> String {
    format!("{}:{}", bot_username, branch)
}

pub fn pr_body(ticket: &Ticket) -> String {
    format!(
        "This PR addresses the issue described in {}.\n\n**Summary:** {}\n\n**Description:** {}",
        ticket.key, ticket.summary, ticket.description
    )
}

pub fn feedback_commit_message(ticket_key: &str) -> String {
    format!("{}: Apply PR feedback fixes", ticket_key)
}

pub fn success_comment(pr_url: &str) -> String {
    format!(
        "AI has created a pull request to address this issue: {}",
        pr_url
    )
}

pub fn failure_comment(message: &str) -> String {
    format!("AI failed to process this ticket: {}", message)
}

/// Prompt for implementing a ticket from scratch.
///
/// Comments written by the Jira bot account are left out.
pub fn ticket_prompt(ticket: &Ticket, jira_bot: &str) -> String {
    let mut prompt = format!(
        "Please help me fix the issue described in Jira ticket {}.\n\n",
        ticket.key
    );
    let _ = write!(prompt, "Summary: {}\n\n", ticket.summary);
    let _ = write!(prompt, "Description: {}\n\n", ticket.description);

    let human_comments: Vec<_> = ticket
        .comments
        .iter()
        .filter(|c| !(c.author == jira_bot && !jira_bot.is_empty()))
        .collect();
    if !human_comments.is_empty() {
        prompt.push_str("Comments:\n");
        for comment in human_comments {
            let name = if comment.author_display_name.is_empty() {
                &comment.author
            } else {
                &comment.author_display_name
            };
            let _ = writeln!(prompt, "- {}: {}", name, comment.body);
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Please analyze the codebase and implement the necessary changes to fix this issue. \
         Make sure to follow the existing code style and patterns in the codebase.",
    );
    prompt
}

fn status_tag(at: Option<DateTime<Utc>>, watermark: DateTime<Utc>) -> &'static str {
    if is_after(at, watermark) {
        "🔄 NEW"
    } else {
        "✅ HANDLED"
    }
}

/// Every non-bot review and comment, each tagged NEW or HANDLED.
pub fn feedback_digest(detail: &PrDetail, watermark: DateTime<Utc>, bot: &str) -> String {
    let mut digest = String::from("## PR Review Feedback\n\n");

    let reviews: Vec<_> = detail
        .reviews
        .iter()
        .filter(|r| !is_bot(&r.author, bot))
        .collect();
    if !reviews.is_empty() {
        digest.push_str("### Reviews\n\n");
        for review in reviews {
            let _ = write!(
                digest,
                "**Review by {} ({}) - {}:**\n{}\n\n",
                review.author,
                review.state,
                status_tag(review.submitted_at, watermark),
                review.body
            );
        }
    }

    let comments: Vec<_> = detail
        .comments
        .iter()
        .filter(|c| !is_bot(&c.author, bot))
        .collect();
    if !comments.is_empty() {
        digest.push_str("### Comments\n\n");
        for comment in comments {
            let location = match (&comment.path, comment.line) {
                (Some(path), Some(line)) => format!(" on {}:{}", path, line),
                (Some(path), None) => format!(" on {}", path),
                _ => String::new(),
            };
            let _ = write!(
                digest,
                "**Comment by {}{} - {}:**\n{}\n\n",
                comment.author,
                location,
                status_tag(comment.created_at, watermark),
                comment.body
            );
        }
    }

    digest
}

/// Prompt for a feedback cycle on an existing pull request.
pub fn feedback_prompt(detail: &PrDetail, digest: &str) -> String {
    let mut prompt = String::from(
        "You are updating an existing pull request to address review feedback.\n\n",
    );

    prompt.push_str("## Original PR Information\n\n");
    let _ = writeln!(prompt, "**Title:** {}", detail.title);
    let _ = writeln!(prompt, "**Description:** {}", detail.body);
    let _ = write!(prompt, "**URL:** {}\n\n", detail.html_url);

    if !detail.files.is_empty() {
        prompt.push_str("## Changed Files\n\n");
        for file in &detail.files {
            let _ = writeln!(
                prompt,
                "- {} ({}): +{} -{}",
                file.filename, file.status, file.additions, file.deletions
            );
            if let Some(patch) = file.patch.as_deref().filter(|p| !p.is_empty()) {
                let _ = write!(prompt, "```diff\n{}\n```\n", patch);
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(digest);

    prompt.push_str(
        "## Instructions\n\n\
         1. Address every item marked 🔄 NEW; items marked ✅ HANDLED are context only.\n\
         2. Make the smallest changes that resolve each request.\n\
         3. Keep the existing code style and patterns.\n\
         4. Do not revert earlier changes unless a reviewer asks for it.\n\
         5. Update or add tests when the requested change affects behavior.\n\
         6. If a request is unclear or conflicts with another, prefer the most recent one.\n",
    );
    prompt
}
