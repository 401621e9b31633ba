use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;

#[derive(Parser)]
#[command(name = "ticketsmith")]
#[command(
    version,
    about = "Turns Jira tickets into GitHub pull requests and iterates on review feedback"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        global = true,
        env = "TICKETSMITH_CONFIG",
        default_value = "ticketsmith.toml"
    )]
    pub config: PathBuf,

    /// Emit logs as newline-delimited JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start both scanners and the health endpoint
    Run {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the new-ticket pipeline once for a ticket
    Process {
        /// Jira ticket key, e.g. PROJ-123
        key: String,
    },
    /// Run the feedback pipeline once for a ticket in review
    Feedback {
        /// Jira ticket key, e.g. PROJ-123
        key: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration with secrets redacted
    Show,
    /// Validate configuration and list every problem
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ticketsmith::telemetry::init_tracing(cli.json_logs, level);

    match &cli.command {
        Commands::Run { port } => cmd::cmd_run(&cli.config, *port).await?,
        Commands::Process { key } => cmd::cmd_process(&cli.config, key).await?,
        Commands::Feedback { key } => cmd::cmd_feedback(&cli.config, key).await?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, command.clone())?,
    }

    Ok(())
}
