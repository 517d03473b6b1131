//! Butler Remote Client
//!
//! A typed HTTP client for the JSON API of a remote CI master.
//!
//! Every request carries HTTP Basic credentials built from the instance's
//! username and API token. Calls go to the instance's load balancer URL when one
//! is configured, otherwise to its direct URL.
//!
//! # Example
//!
//! ```no_run
//! use butler_client::MasterClient;
//!
//! #[tokio::main]
//! async fn main() -> butler_client::Result<()> {
//!     let client = MasterClient::new("https://ci.example.com", "admin", "api-token")?;
//!
//!     for job in client.get_jobs().await? {
//!         println!("{} -> {}", job.name, job.status());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod factory;
mod jobs;
mod system;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use factory::{ClientFactory, ClientProvider};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use butler_core::domain::instance::Instance;
use butler_core::remote::{
    QueueItem, RemoteBuild, RemoteComputer, RemoteJobDetail, RemoteJobSummary, SystemInfo,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

/// Bound applied to build triggers and health probes
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations the fleet performs against one remote master
///
/// Implemented by [`MasterClient`]; the orchestrator depends only on this trait
/// so the sync engine and balancer can run against fakes.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// List the top-level jobs with color and last build reference
    async fn get_jobs(&self) -> Result<Vec<RemoteJobSummary>>;

    /// Detailed information for one job
    async fn get_job(&self, name: &str) -> Result<RemoteJobDetail>;

    /// The `limit` most recent builds of a job, newest first
    async fn get_builds(&self, name: &str, limit: usize) -> Result<Vec<RemoteBuild>>;

    async fn get_build(&self, name: &str, number: i32) -> Result<RemoteBuild>;

    /// Plain-text console log of a build
    async fn get_console_output(&self, name: &str, number: i32) -> Result<String>;

    /// Start a build, with parameters when any are given
    async fn trigger_build(
        &self,
        name: &str,
        params: Option<&BTreeMap<String, String>>,
    ) -> Result<()>;

    async fn get_executors(&self) -> Result<Vec<RemoteComputer>>;

    async fn get_queue(&self) -> Result<Vec<QueueItem>>;

    /// `true` iff the master answers its root API within the probe timeout
    async fn health_check(&self) -> bool;

    async fn get_system_info(&self) -> Result<SystemInfo>;

    /// GET an absolute URL with this master's credentials and return the status code
    ///
    /// Non-2xx answers are not errors here; only transport failures are.
    async fn probe(&self, url: &str) -> Result<u16>;
}

/// HTTP client for one remote master
#[derive(Debug, Clone)]
pub struct MasterClient {
    /// Base URL without trailing slash (e.g., "https://ci.example.com")
    base_url: String,
    /// Parsed form of `base_url`, used to build encoded endpoint URLs
    base: Url,
    /// HTTP client with credentials installed as default headers
    client: Client,
    probe_timeout: Duration,
}

impl MasterClient {
    /// Create a client for the master at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the master (e.g., "https://ci.example.com/")
    /// * `username` - Account used for Basic authentication
    /// * `api_token` - API token of that account
    pub fn new(
        base_url: impl Into<String>,
        username: &str,
        api_token: &str,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid base URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidRequest(format!(
                "{base_url} cannot be used as a base URL"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, basic_auth_header(username, api_token)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            base,
            client,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    /// Create a client for a registered instance
    ///
    /// Uses the load balancer URL when the instance has one.
    pub fn from_instance(instance: &Instance) -> Result<Self> {
        Self::new(
            instance.effective_base_url(),
            &instance.username,
            &instance.api_token,
        )
    }

    /// Override the bound applied to triggers and health probes
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Get the base URL of the master
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an endpoint URL from path segments, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    /// URL of a job's API, `{base}/job/{name}/...`
    fn job_endpoint(&self, name: &str, rest: &[&str]) -> Url {
        let mut segments = vec!["job", name];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is not needed
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await.map(|_| ())
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

/// `Authorization` header value for HTTP Basic credentials
pub fn basic_auth_header(username: &str, api_token: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{api_token}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|e| ClientError::InvalidRequest(format!("Invalid credentials: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl MasterApi for MasterClient {
    async fn get_jobs(&self) -> Result<Vec<RemoteJobSummary>> {
        MasterClient::get_jobs(self).await
    }

    async fn get_job(&self, name: &str) -> Result<RemoteJobDetail> {
        MasterClient::get_job(self, name).await
    }

    async fn get_builds(&self, name: &str, limit: usize) -> Result<Vec<RemoteBuild>> {
        MasterClient::get_builds(self, name, limit).await
    }

    async fn get_build(&self, name: &str, number: i32) -> Result<RemoteBuild> {
        MasterClient::get_build(self, name, number).await
    }

    async fn get_console_output(&self, name: &str, number: i32) -> Result<String> {
        MasterClient::get_console_output(self, name, number).await
    }

    async fn trigger_build(
        &self,
        name: &str,
        params: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        MasterClient::trigger_build(self, name, params).await
    }

    async fn get_executors(&self) -> Result<Vec<RemoteComputer>> {
        MasterClient::get_executors(self).await
    }

    async fn get_queue(&self) -> Result<Vec<QueueItem>> {
        MasterClient::get_queue(self).await
    }

    async fn health_check(&self) -> bool {
        MasterClient::health_check(self).await
    }

    async fn get_system_info(&self) -> Result<SystemInfo> {
        MasterClient::get_system_info(self).await
    }

    async fn probe(&self, url: &str) -> Result<u16> {
        MasterClient::probe(self, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = MasterClient::new("http://localhost:8080/", "admin", "token").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        let err = MasterClient::new("not a url", "admin", "token").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_endpoint_encodes_job_names() {
        let client = MasterClient::new("https://ci.example.com/jenkins/", "a", "t").unwrap();
        let url = client.job_endpoint("release build", &["api", "json"]);
        assert_eq!(
            url.as_str(),
            "https://ci.example.com/jenkins/job/release%20build/api/json"
        );

        let url = client.job_endpoint("a/b", &["api", "json"]);
        assert_eq!(url.as_str(), "https://ci.example.com/jenkins/job/a%2Fb/api/json");
    }

    #[test]
    fn test_endpoint_on_root_base() {
        let client = MasterClient::new("http://localhost:8080", "a", "t").unwrap();
        assert_eq!(
            client.endpoint(&["api", "json"]).as_str(),
            "http://localhost:8080/api/json"
        );
    }

    #[test]
    fn test_basic_auth_header() {
        let value = basic_auth_header("admin", "secret").unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic YWRtaW46c2VjcmV0");
        assert!(value.is_sensitive());
    }
}
