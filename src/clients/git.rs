//! Thin async wrapper over the `git` CLI.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

static URL_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(https?://)[^/@\s]+@").unwrap());

/// Replace `user:secret@` in any URL with `***@`.
pub fn redact_credentials(text: &str) -> String {
    URL_CREDENTIALS.replace_all(text, "${1}***@").into_owned()
}

/// Build an HTTPS remote that authenticates with an installation or personal token.
pub fn authenticated_remote(owner: &str, repo: &str, token: &str) -> String {
    format!(
        "https://x-access-token:{}@github.com/{}/{}.git",
        token, owner, repo
    )
}

/// Run `git <args>` in `dir` and return trimmed stdout.
pub async fn run(dir: &Path, args: &[&str]) -> Result<String> {
    let shown = redact_credentials(&args.join(" "));
    debug!(dir = %dir.display(), "git {}", shown);

    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", shown))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed: {}", shown, redact_credentials(stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`run`] but only reports whether git exited successfully.
pub async fn succeeds(dir: &Path, args: &[&str]) -> Result<bool> {
    let status = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to run git {}", redact_credentials(&args.join(" "))))?;
    Ok(status.success())
}

/// Bring an existing clone back to its remote's default branch, whatever
/// that branch is called, and drop untracked files.
pub async fn reset_to_remote_default(dir: &Path) -> Result<()> {
    run(dir, &["fetch", "origin", "--prune"]).await?;
    run(dir, &["remote", "set-head", "origin", "--auto"]).await?;
    run(dir, &["reset", "--hard", "origin/HEAD"]).await?;
    run(dir, &["clean", "-fdx"]).await?;
    Ok(())
}
