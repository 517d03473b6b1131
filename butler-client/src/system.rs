//! Executor, queue and system endpoints

use butler_core::remote::{ComputerList, QueueItem, QueueList, RemoteComputer, SystemInfo};
use tracing::debug;

use crate::MasterClient;
use crate::error::Result;

/// Header carrying the master's version
const VERSION_HEADER: &str = "x-jenkins";

impl MasterClient {
    /// List build agents and their executor slots
    pub async fn get_executors(&self) -> Result<Vec<RemoteComputer>> {
        let mut url = self.endpoint(&["computer", "api", "json"]);
        url.query_pairs_mut().append_pair(
            "tree",
            "computer[displayName,idle,offline,executors[idle,currentExecutable[url]]]",
        );
        let response = self.client.get(url).send().await?;

        let list: ComputerList = self.handle_response(response).await?;
        Ok(list.computer)
    }

    /// List items waiting in the build queue
    pub async fn get_queue(&self) -> Result<Vec<QueueItem>> {
        let url = self.endpoint(&["queue", "api", "json"]);
        let response = self.client.get(url).send().await?;

        let list: QueueList = self.handle_response(response).await?;
        Ok(list.items)
    }

    /// Whether the master answers its root API within the probe timeout
    ///
    /// Never fails; any error reads as unhealthy.
    pub async fn health_check(&self) -> bool {
        let url = self.endpoint(&["api", "json"]);
        match self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check of {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    /// Root system information, with the version read from the response header
    pub async fn get_system_info(&self) -> Result<SystemInfo> {
        let url = self.endpoint(&["api", "json"]);
        let response = self.client.get(url).send().await?;

        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut info: SystemInfo = self.handle_response(response).await?;
        if version.is_some() {
            info.version = version;
        }
        Ok(info)
    }

    /// GET an absolute URL with this client's credentials, bounded by the probe timeout
    pub async fn probe(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
