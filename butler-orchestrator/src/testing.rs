//! Test doubles shared by the service and API test suites

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use butler_client::{ClientError, ClientProvider, MasterApi, Result};
use butler_core::domain::build::BuildStatus;
use butler_core::domain::instance::{HealthStatus, Instance};
use butler_core::domain::job::JobType;
use butler_core::dto::job::JobUpsert;
use butler_core::remote::{
    BuildRef, QueueItem, RemoteBuild, RemoteComputer, RemoteExecutor, RemoteJobDetail,
    RemoteJobSummary, SystemInfo,
};
use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Active, healthy instance at `https://{name}.example.com`
pub fn instance(name: &str) -> Instance {
    let now = Utc::now();
    Instance {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        url: format!("https://{name}.example.com"),
        load_balancer_url: None,
        health_check_url: None,
        username: "admin".to_string(),
        api_token: "token".to_string(),
        is_active: true,
        is_primary: false,
        cluster_id: None,
        priority: 0,
        current_load: 0,
        max_connections: 100,
        health_status: HealthStatus::Healthy,
        last_health_check: Some(now),
        last_sync_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn job_upsert(name: &str) -> JobUpsert {
    JobUpsert {
        name: name.to_string(),
        display_name: name.to_string(),
        url: format!("https://ci/job/{name}/"),
        job_type: JobType::Pipeline,
        color: "blue".to_string(),
        description: String::new(),
        buildable: true,
        in_queue: false,
        last_build_number: 1,
        last_build_status: BuildStatus::Success,
        last_build_time: None,
        health_score: 100,
    }
}

pub fn remote_job(name: &str, color: &str, last_build: Option<i32>) -> RemoteJobSummary {
    RemoteJobSummary {
        name: name.to_string(),
        url: Some(format!("https://ci/job/{name}/")),
        color: Some(color.to_string()),
        last_build: last_build.map(|number| BuildRef {
            number,
            url: None,
            timestamp: Some(1_700_000_000_000),
        }),
    }
}

pub fn remote_build(number: i32, result: Option<&str>) -> RemoteBuild {
    RemoteBuild {
        number,
        url: Some(format!("https://ci/job/api/{number}/")),
        result: result.map(str::to_string),
        timestamp: Some(1_700_000_000_000),
        duration: Some(1000),
        building: Some(result.is_none()),
    }
}

fn unavailable() -> ClientError {
    ClientError::from_status(503, "Service Unavailable")
}

/// Scripted remote master
#[derive(Debug, Default)]
pub struct FakeMaster {
    pub jobs: Vec<RemoteJobSummary>,
    /// `get_jobs` fails
    pub fail_jobs: bool,
    pub details: HashMap<String, RemoteJobDetail>,
    /// Jobs whose detail fetch fails
    pub failing_details: HashSet<String>,
    pub builds: HashMap<String, Vec<RemoteBuild>>,
    pub executors: Vec<RemoteComputer>,
    pub version: Option<String>,
    /// System info and probes fail
    pub unreachable: bool,
    /// Status returned by probes, 200 when unset
    pub probe_status: Option<u16>,
    pub probe_delay: Option<Duration>,
    /// When set, `get_jobs` waits for a notification before answering
    pub gate: Option<Arc<Notify>>,
    /// `(job, limit)` of every build listing request
    pub build_requests: Mutex<Vec<(String, usize)>>,
    pub triggered: Mutex<Vec<String>>,
}

impl FakeMaster {
    /// Master with idle executors reporting the given counts
    pub fn with_executors(mut self, total: usize, idle: usize) -> Self {
        let executors = (0..total)
            .map(|i| RemoteExecutor {
                idle: i < idle,
                current_executable: None,
            })
            .collect();
        self.executors = vec![RemoteComputer {
            display_name: "built-in".to_string(),
            idle: idle == total,
            offline: false,
            executors,
        }];
        self
    }

    pub fn build_requests(&self) -> Vec<(String, usize)> {
        self.build_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MasterApi for FakeMaster {
    async fn get_jobs(&self) -> Result<Vec<RemoteJobSummary>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_jobs {
            return Err(unavailable());
        }
        Ok(self.jobs.clone())
    }

    async fn get_job(&self, name: &str) -> Result<RemoteJobDetail> {
        if self.failing_details.contains(name) {
            return Err(ClientError::ParseError(format!("bad detail for {name}")));
        }
        Ok(self.details.get(name).cloned().unwrap_or_default())
    }

    async fn get_builds(&self, name: &str, limit: usize) -> Result<Vec<RemoteBuild>> {
        self.build_requests
            .lock()
            .unwrap()
            .push((name.to_string(), limit));
        let builds = self.builds.get(name).cloned().unwrap_or_default();
        Ok(builds.into_iter().take(limit).collect())
    }

    async fn get_build(&self, name: &str, number: i32) -> Result<RemoteBuild> {
        self.builds
            .get(name)
            .and_then(|builds| builds.iter().find(|b| b.number == number))
            .cloned()
            .ok_or_else(|| ClientError::from_status(404, "Not Found"))
    }

    async fn get_console_output(&self, _name: &str, _number: i32) -> Result<String> {
        Ok("Finished: SUCCESS\n".to_string())
    }

    async fn trigger_build(
        &self,
        name: &str,
        _params: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        self.triggered.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn get_executors(&self) -> Result<Vec<RemoteComputer>> {
        if self.unreachable {
            return Err(unavailable());
        }
        Ok(self.executors.clone())
    }

    async fn get_queue(&self) -> Result<Vec<QueueItem>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> bool {
        !self.unreachable
    }

    async fn get_system_info(&self) -> Result<SystemInfo> {
        if self.unreachable {
            return Err(unavailable());
        }
        Ok(SystemInfo {
            version: self.version.clone(),
            ..Default::default()
        })
    }

    async fn probe(&self, _url: &str) -> Result<u16> {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            return Err(unavailable());
        }
        Ok(self.probe_status.unwrap_or(200))
    }
}

/// Client provider resolving fakes by base URL
#[derive(Debug, Default)]
pub struct FakeProvider {
    masters: Mutex<HashMap<String, Arc<FakeMaster>>>,
    pub removed: Mutex<Vec<Uuid>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `master` for every instance whose effective base URL is `url`
    pub fn insert(&self, url: &str, master: FakeMaster) -> Arc<FakeMaster> {
        let master = Arc::new(master);
        self.masters
            .lock()
            .unwrap()
            .insert(url.trim_end_matches('/').to_string(), Arc::clone(&master));
        master
    }

    /// Serve `master` for `instance`
    pub fn serve(&self, instance: &Instance, master: FakeMaster) -> Arc<FakeMaster> {
        self.insert(instance.effective_base_url(), master)
    }

    pub fn removed(&self) -> Vec<Uuid> {
        self.removed.lock().unwrap().clone()
    }
}

impl ClientProvider for FakeProvider {
    fn client(&self, instance: &Instance) -> Result<Arc<dyn MasterApi>> {
        let url = instance.effective_base_url().trim_end_matches('/');
        self.masters
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .map(|master| master as Arc<dyn MasterApi>)
            .ok_or_else(|| ClientError::InvalidRequest(format!("no fake master at {url}")))
    }

    fn connect(
        &self,
        base_url: &str,
        _username: &str,
        _api_token: &str,
    ) -> Result<Arc<dyn MasterApi>> {
        let url = base_url.trim_end_matches('/');
        self.masters
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .map(|master| master as Arc<dyn MasterApi>)
            .ok_or_else(|| ClientError::InvalidRequest(format!("no fake master at {url}")))
    }

    fn remove(&self, instance_id: Uuid) {
        self.removed.lock().unwrap().push(instance_id);
    }

    fn clear(&self) {
        self.masters.lock().unwrap().clear();
    }
}
