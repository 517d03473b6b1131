//! Job command handlers
//!
//! Handles job-related CLI commands: listing, details, build history,
//! console output and triggering.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use butler_client::MasterClient;
use butler_core::domain::build::BuildStatus;
use butler_core::remote::{RemoteBuild, timestamp_from_millis};
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List all jobs of the master
    List,
    /// Show job details
    Show {
        /// Job name
        name: String,
    },
    /// Show the most recent builds of a job
    Builds {
        /// Job name
        name: String,

        /// Number of builds to show
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Print the console output of a build
    Console {
        /// Job name
        name: String,

        /// Build number
        number: i32,
    },
    /// Trigger a build
    Trigger {
        /// Job name
        name: String,

        /// Build parameter as KEY=VALUE (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client()?;

    match command {
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Show { name } => show_job(&client, &name).await,
        JobCommands::Builds { name, limit } => list_builds(&client, &name, limit).await,
        JobCommands::Console { name, number } => console(&client, &name, number).await,
        JobCommands::Trigger { name, params } => trigger(&client, &name, params).await,
    }
}

/// List all jobs
async fn list_jobs(client: &MasterClient) -> Result<()> {
    let jobs = client.get_jobs().await.context("Failed to list jobs")?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} job(s):", jobs.len()).bold());
    println!();
    for job in jobs {
        let last = job
            .last_build
            .as_ref()
            .map(|build| format!("#{}", build.number))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {:<40} {:<12} {}",
            "▸".cyan(),
            job.name,
            colorize_status(job.status()),
            last.dimmed()
        );
    }

    Ok(())
}

/// Show details of a single job
async fn show_job(client: &MasterClient, name: &str) -> Result<()> {
    let detail = client
        .get_job(name)
        .await
        .with_context(|| format!("Failed to fetch job {name}"))?;

    println!("{}", "Job Details:".bold());
    println!("  Name:      {}", name.cyan());
    if let Some(display_name) = &detail.display_name {
        println!("  Display:   {}", display_name);
    }
    println!("  Type:      {}", detail.job_type());
    println!("  Health:    {}", detail.health_score());
    println!(
        "  Buildable: {}",
        if detail.buildable.unwrap_or(true) {
            "✓".green()
        } else {
            "✗".red()
        }
    );
    if detail.in_queue.unwrap_or(false) {
        println!("  Queued:    {}", "yes".yellow());
    }
    if let Some(description) = detail.description.as_deref().filter(|d| !d.is_empty()) {
        println!("\n{}", "Description:".bold());
        println!("  {}", description);
    }

    Ok(())
}

/// List the most recent builds of a job
async fn list_builds(client: &MasterClient, name: &str, limit: usize) -> Result<()> {
    let builds = client
        .get_builds(name, limit)
        .await
        .with_context(|| format!("Failed to fetch builds of {name}"))?;

    if builds.is_empty() {
        println!("{}", format!("No builds found for {name}.").yellow());
        return Ok(());
    }

    println!("{}", format!("Builds of {name}:").bold());
    for build in &builds {
        print_build(build);
    }

    Ok(())
}

fn print_build(build: &RemoteBuild) {
    let started = timestamp_from_millis(build.timestamp)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let duration = build
        .duration
        .map(|ms| format!("{}s", ms / 1000))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  #{:<6} {:<12} {}  {}",
        build.number,
        colorize_status(build.status()),
        started.dimmed(),
        duration
    );
}

/// Print the console output of a build
async fn console(client: &MasterClient, name: &str, number: i32) -> Result<()> {
    let output = client
        .get_console_output(name, number)
        .await
        .with_context(|| format!("Failed to fetch console output of {name} #{number}"))?;

    print!("{output}");
    Ok(())
}

/// Trigger a build, with parameters when any are given
async fn trigger(client: &MasterClient, name: &str, params: Vec<(String, String)>) -> Result<()> {
    let params: BTreeMap<String, String> = params.into_iter().collect();
    let params = (!params.is_empty()).then_some(&params);

    client
        .trigger_build(name, params)
        .await
        .with_context(|| format!("Failed to trigger {name}"))?;

    println!("{} Build of {} queued", "✓".green(), name.cyan());
    Ok(())
}

/// Parse a `KEY=VALUE` build parameter
fn parse_param(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };

    let key = key.trim();
    if key.is_empty() {
        bail!("parameter name cannot be empty");
    }

    Ok((key.to_string(), value.to_string()))
}

fn colorize_status(status: BuildStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        BuildStatus::Success => label.green(),
        BuildStatus::Failure => label.red(),
        BuildStatus::Unstable => label.yellow(),
        BuildStatus::Aborted => label.dimmed(),
        BuildStatus::NotBuilt => label.normal(),
        BuildStatus::Running => label.cyan(),
    }
}
