//! Remote master payloads
//!
//! Typed shapes of the JSON returned by a remote CI master's `/api/json`
//! endpoints. Every field the master may omit is optional or defaulted, so a
//! sparse payload still decodes; only a structurally wrong payload is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build::BuildStatus;
use crate::domain::job::JobType;

// =============================================================================
// Jobs
// =============================================================================

/// Response of the root job listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub jobs: Vec<RemoteJobSummary>,
}

/// One entry of the job listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobSummary {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub last_build: Option<BuildRef>,
}

impl RemoteJobSummary {
    /// Color token, `notbuilt` when the master does not report one
    pub fn color(&self) -> &str {
        self.color.as_deref().unwrap_or("notbuilt")
    }

    /// Last build status derived from the color token
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_color(self.color())
    }
}

/// Reference to a build embedded in another payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRef {
    pub number: i32,
    #[serde(default)]
    pub url: Option<String>,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Job detail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobDetail {
    #[serde(rename = "_class", default)]
    pub class: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub buildable: Option<bool>,
    #[serde(default)]
    pub in_queue: Option<bool>,
    #[serde(default)]
    pub health_report: Vec<HealthReport>,
}

impl RemoteJobDetail {
    pub fn job_type(&self) -> JobType {
        JobType::from_class(self.class.as_deref().unwrap_or_default())
    }

    /// Score of the first health report, 100 when none is reported
    pub fn health_score(&self) -> i32 {
        self.health_report
            .first()
            .and_then(|report| report.score)
            .unwrap_or(100)
            .clamp(0, 100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

// =============================================================================
// Builds
// =============================================================================

/// Response of the per-job build listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildList {
    #[serde(default)]
    pub builds: Vec<RemoteBuild>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBuild {
    pub number: i32,
    #[serde(default)]
    pub url: Option<String>,
    /// `null` while the build is running
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Milliseconds
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub building: Option<bool>,
}

impl RemoteBuild {
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_result(self.result.as_deref())
    }
}

// =============================================================================
// Executors & Queue
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputerList {
    #[serde(default)]
    pub computer: Vec<RemoteComputer>,
}

/// A build agent (node) and its executor slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteComputer {
    pub display_name: String,
    #[serde(default)]
    pub idle: bool,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub executors: Vec<RemoteExecutor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteExecutor {
    #[serde(default)]
    pub idle: bool,
    #[serde(default)]
    pub current_executable: Option<ExecutableRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableRef {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueList {
    #[serde(default)]
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: i64,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub stuck: bool,
    #[serde(default)]
    pub in_queue_since: Option<i64>,
    #[serde(default)]
    pub task: Option<TaskRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

// =============================================================================
// System
// =============================================================================

/// Root `/api/json` payload of a master
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_description: Option<String>,
    #[serde(default)]
    pub num_executors: Option<i32>,
    #[serde(default)]
    pub use_security: Option<bool>,
    /// Taken from the `X-Jenkins` response header, not the body
    #[serde(default)]
    pub version: Option<String>,
}

/// Executor counters aggregated over all computers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorCounts {
    pub total: usize,
    pub idle: usize,
}

impl ExecutorCounts {
    pub fn from_computers(computers: &[RemoteComputer]) -> Self {
        computers
            .iter()
            .flat_map(|computer| computer.executors.iter())
            .fold(Self::default(), |mut counts, executor| {
                counts.total += 1;
                if executor.idle {
                    counts.idle += 1;
                }
                counts
            })
    }

    pub fn busy(&self) -> usize {
        self.total - self.idle
    }

    pub fn utilization_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.busy() as f64 / self.total as f64 * 100.0
    }
}

/// Convert remote epoch milliseconds into a UTC timestamp
pub fn timestamp_from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_list_decodes_sparse_payload() {
        let payload = r#"{
            "_class": "hudson.model.Hudson",
            "jobs": [
                {"name": "api", "url": "https://ci/job/api/", "color": "blue",
                 "lastBuild": {"number": 42, "url": "https://ci/job/api/42/"}},
                {"name": "docs"}
            ]
        }"#;

        let list: JobList = serde_json::from_str(payload).unwrap();
        assert_eq!(list.jobs.len(), 2);
        assert_eq!(list.jobs[0].last_build.as_ref().unwrap().number, 42);
        assert_eq!(list.jobs[0].status(), BuildStatus::Success);
        assert_eq!(list.jobs[1].color(), "notbuilt");
        assert_eq!(list.jobs[1].status(), BuildStatus::NotBuilt);
    }

    #[test]
    fn test_job_list_missing_jobs_field() {
        let list: JobList = serde_json::from_str("{}").unwrap();
        assert!(list.jobs.is_empty());
    }

    #[test]
    fn test_job_detail_fields() {
        let payload = r#"{
            "_class": "org.jenkinsci.plugins.workflow.job.WorkflowJob",
            "displayName": "API Service",
            "buildable": false,
            "inQueue": true,
            "healthReport": [{"score": 80, "description": "Build stability"}, {"score": 20}]
        }"#;

        let detail: RemoteJobDetail = serde_json::from_str(payload).unwrap();
        assert_eq!(detail.job_type(), JobType::Pipeline);
        assert_eq!(detail.health_score(), 80);
        assert_eq!(detail.buildable, Some(false));
        assert_eq!(detail.in_queue, Some(true));
    }

    #[test]
    fn test_health_score_defaults_to_full() {
        let detail = RemoteJobDetail::default();
        assert_eq!(detail.health_score(), 100);
        assert_eq!(detail.job_type(), JobType::Freestyle);
    }

    #[test]
    fn test_running_build_has_null_result() {
        let payload = r#"{"builds": [
            {"number": 7, "result": null, "building": true, "timestamp": 1700000000000, "duration": 0},
            {"number": 6, "result": "FAILURE", "timestamp": 1699990000000, "duration": 51234}
        ]}"#;

        let list: BuildList = serde_json::from_str(payload).unwrap();
        assert_eq!(list.builds[0].status(), BuildStatus::Running);
        assert_eq!(list.builds[1].status(), BuildStatus::Failure);
    }

    #[test]
    fn test_executor_counts() {
        let payload = r#"{"computer": [
            {"displayName": "built-in", "idle": false, "offline": false,
             "executors": [{"idle": true}, {"idle": false, "currentExecutable": {"url": "https://ci/job/api/7/"}}]},
            {"displayName": "agent-1", "idle": true, "offline": true,
             "executors": [{"idle": true}]}
        ]}"#;

        let list: ComputerList = serde_json::from_str(payload).unwrap();
        let counts = ExecutorCounts::from_computers(&list.computer);
        assert_eq!(counts, ExecutorCounts { total: 3, idle: 2 });
        assert_eq!(counts.busy(), 1);
        assert!((counts.utilization_percent() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_from_millis() {
        let ts = timestamp_from_millis(Some(1_700_000_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(timestamp_from_millis(None).is_none());
    }
}
