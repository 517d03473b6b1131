//! Butler CLI
//!
//! Command-line interface for inspecting and driving a remote CI master directly.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "butler")]
#[command(about = "Butler CI master CLI", long_about = None)]
struct Cli {
    /// Base URL of the CI master
    #[arg(long, env = "BUTLER_MASTER_URL", default_value = "http://localhost:8080")]
    url: String,

    /// User to authenticate as
    #[arg(long, env = "BUTLER_MASTER_USER")]
    user: String,

    /// API token of the user
    #[arg(long, env = "BUTLER_MASTER_TOKEN", hide_env_values = true)]
    token: String,

    /// Timeout for health checks and build triggers, in milliseconds
    #[arg(long, env = "BUTLER_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        master_url: cli.url,
        username: cli.user,
        api_token: cli.token,
        probe_timeout: std::time::Duration::from_millis(cli.timeout_ms),
    };

    handle_command(cli.command, &config).await
}
