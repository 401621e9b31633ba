//! One-shot pipeline runs — `ticketsmith process` and `ticketsmith feedback`.

use std::path::Path;

use anyhow::Result;
use ticketsmith::app::Services;
use ticketsmith::pipeline::FeedbackOutcome;

use super::load_valid_config;

pub async fn cmd_process(config_path: &Path, key: &str) -> Result<()> {
    let services = Services::from_config(load_valid_config(config_path)?)?;
    let run = services.ticket_pipeline().process(key).await?;

    println!("Pull request: {}", run.pull_request.html_url);
    if !run.committed {
        println!("Note: the agent made no changes, the pull request branch has no new commits.");
    }
    Ok(())
}

pub async fn cmd_feedback(config_path: &Path, key: &str) -> Result<()> {
    let services = Services::from_config(load_valid_config(config_path)?)?;

    match services.feedback_pipeline().process(key).await? {
        FeedbackOutcome::NoPullRequest => println!("{} has no linked pull request.", key),
        FeedbackOutcome::NoNewFeedback => println!("No new review feedback for {}.", key),
        FeedbackOutcome::Applied {
            committed,
            watermark,
        } => {
            if committed {
                println!("Feedback applied and pushed for {}.", key);
            } else {
                println!("Feedback processed for {}; no code changes were needed.", key);
            }
            println!("Watermark: {}", watermark.format("%Y-%m-%dT%H:%M:%SZ"));
        }
    }
    Ok(())
}
