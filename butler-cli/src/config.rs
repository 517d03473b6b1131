//! Configuration module
//!
//! Connection settings for the master the CLI talks to.

use std::time::Duration;

use anyhow::{Context, Result};
use butler_client::MasterClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub master_url: String,
    pub username: String,
    pub api_token: String,
    pub probe_timeout: Duration,
}

impl Config {
    /// Build an authenticated client for the configured master
    pub fn client(&self) -> Result<MasterClient> {
        let client = MasterClient::new(&self.master_url, &self.username, &self.api_token)
            .with_context(|| format!("Invalid master configuration for {}", self.master_url))?;
        Ok(client.with_probe_timeout(self.probe_timeout))
    }
}
