//! CLI command implementations.
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `run`     | `Run`                   |
//! | `process` | `Process`, `Feedback`   |
//! | `config`  | `Config`                |

pub mod config;
pub mod process;
pub mod run;

pub use config::cmd_config;
pub use process::{cmd_feedback, cmd_process};
pub use run::cmd_run;

use std::path::Path;

use anyhow::Result;
use ticketsmith::config::Config;

/// Load and validate configuration for commands that talk to Jira and GitHub.
fn load_valid_config(path: &Path) -> Result<Config> {
    let config = Config::load_layered(path)?;
    config.validate()?;
    Ok(config)
}
