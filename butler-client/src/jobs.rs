//! Job and build endpoints

use std::collections::BTreeMap;

use butler_core::remote::{BuildList, JobList, RemoteBuild, RemoteJobDetail, RemoteJobSummary};
use tracing::debug;

use crate::MasterClient;
use crate::error::{ClientError, Result};

const JOB_TREE: &str = "jobs[name,url,color,lastBuild[number,url,timestamp]]";
const BUILD_FIELDS: &str = "number,url,result,timestamp,duration,building";

impl MasterClient {
    // =============================================================================
    // Jobs
    // =============================================================================

    /// List all top-level jobs
    ///
    /// A master without jobs answers with an empty list.
    pub async fn get_jobs(&self) -> Result<Vec<RemoteJobSummary>> {
        let mut url = self.endpoint(&["api", "json"]);
        url.query_pairs_mut().append_pair("tree", JOB_TREE);
        let response = self.client.get(url).send().await?;

        let list: JobList = self.handle_response(response).await?;
        Ok(list.jobs)
    }

    /// Get a job's detail (class, display name, health reports)
    pub async fn get_job(&self, name: &str) -> Result<RemoteJobDetail> {
        let url = self.job_endpoint(name, &["api", "json"]);
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Builds
    // =============================================================================

    /// Get the `limit` most recent builds of a job
    pub async fn get_builds(&self, name: &str, limit: usize) -> Result<Vec<RemoteBuild>> {
        let mut url = self.job_endpoint(name, &["api", "json"]);
        url.query_pairs_mut()
            .append_pair("tree", &format!("builds[{BUILD_FIELDS}]{{0,{limit}}}"));
        let response = self.client.get(url).send().await?;

        let list: BuildList = self.handle_response(response).await?;
        Ok(list.builds)
    }

    /// Get one build of a job
    pub async fn get_build(&self, name: &str, number: i32) -> Result<RemoteBuild> {
        let number = number.to_string();
        let url = self.job_endpoint(name, &[&number, "api", "json"]);
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// Get the plain-text console log of a build
    pub async fn get_console_output(&self, name: &str, number: i32) -> Result<String> {
        let number = number.to_string();
        let url = self.job_endpoint(name, &[&number, "consoleText"]);
        let response = self.client.get(url).send().await?;

        let response = self.check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to read console output: {}", e)))
    }

    /// Trigger a build
    ///
    /// Posts to `buildWithParameters` when parameters are given, otherwise to
    /// `build`. Bounded by the probe timeout.
    pub async fn trigger_build(
        &self,
        name: &str,
        params: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        let url = match params.filter(|params| !params.is_empty()) {
            Some(params) => {
                let mut url = self.job_endpoint(name, &["buildWithParameters"]);
                url.query_pairs_mut().extend_pairs(params.iter());
                url
            }
            None => self.job_endpoint(name, &["build"]),
        };

        debug!("Triggering build of {} on {}", name, self.base_url);
        let response = self
            .client
            .post(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tree_query() {
        let client = MasterClient::new("http://localhost:8080", "a", "t").unwrap();
        let mut url = client.job_endpoint("api", &["api", "json"]);
        url.query_pairs_mut()
            .append_pair("tree", &format!("builds[{BUILD_FIELDS}]{{0,{}}}", 5));

        let tree = url
            .query_pairs()
            .find(|(key, _)| key == "tree")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(
            tree,
            "builds[number,url,result,timestamp,duration,building]{0,5}"
        );
    }
}
