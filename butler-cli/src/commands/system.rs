//! System command handlers
//!
//! Reachability, executors and the build queue of the master.

use anyhow::{Context, Result, bail};
use butler_core::remote::ExecutorCounts;
use colored::*;

use crate::config::Config;

/// Check reachability and report the master version
pub async fn check(config: &Config) -> Result<()> {
    let client = config.client()?;

    if !client.health_check().await {
        bail!("CI master at {} is not reachable", client.base_url());
    }

    let info = client
        .get_system_info()
        .await
        .context("Failed to fetch system info")?;

    println!("{} Connected to {}", "✓".green(), client.base_url().cyan());
    println!(
        "  Version:   {}",
        info.version.as_deref().unwrap_or("unknown")
    );
    if let Some(mode) = &info.mode {
        println!("  Mode:      {}", mode);
    }
    if let Some(executors) = info.num_executors {
        println!("  Executors: {}", executors);
    }

    Ok(())
}

/// Show build executors per computer
pub async fn executors(config: &Config) -> Result<()> {
    let client = config.client()?;
    let computers = client
        .get_executors()
        .await
        .context("Failed to fetch executors")?;

    if computers.is_empty() {
        println!("{}", "No computers found.".yellow());
        return Ok(());
    }

    for computer in &computers {
        let state = if computer.offline {
            "offline".red()
        } else if computer.idle {
            "idle".green()
        } else {
            "busy".yellow()
        };
        let busy = computer.executors.iter().filter(|e| !e.idle).count();
        println!(
            "  {} {:<30} {:<8} {}/{} busy",
            "▸".cyan(),
            computer.display_name,
            state,
            busy,
            computer.executors.len()
        );
    }

    let counts = ExecutorCounts::from_computers(&computers);
    println!();
    println!(
        "{}",
        format!(
            "{} executor(s), {} idle, {:.1}% utilized",
            counts.total,
            counts.idle,
            counts.utilization_percent()
        )
        .bold()
    );

    Ok(())
}

/// Show queued items
pub async fn queue(config: &Config) -> Result<()> {
    let client = config.client()?;
    let items = client.get_queue().await.context("Failed to fetch queue")?;

    if items.is_empty() {
        println!("{}", "Queue is empty.".green());
        return Ok(());
    }

    println!("{}", format!("{} item(s) queued:", items.len()).bold());
    for item in items {
        let task = item
            .task
            .as_ref()
            .and_then(|task| task.name.as_deref())
            .unwrap_or("?");
        let flag = if item.stuck {
            " stuck".red()
        } else if item.blocked {
            " blocked".yellow()
        } else {
            "".normal()
        };
        println!("  {} #{} {}{}", "▸".cyan(), item.id, task, flag);
        if let Some(why) = &item.why {
            println!("      {}", why.dimmed());
        }
    }

    Ok(())
}
