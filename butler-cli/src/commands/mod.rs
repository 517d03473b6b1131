//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod system;

pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check that the master is reachable and report its version
    Check,
    /// Job inspection and triggering
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show build executors and their state
    Executors,
    /// Show the build queue
    Queue,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Check => system::check(config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Executors => system::executors(config).await,
        Commands::Queue => system::queue(config).await,
    }
}
