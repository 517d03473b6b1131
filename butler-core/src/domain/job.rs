//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::BuildStatus;

/// A CI pipeline belonging to exactly one instance
///
/// Identity is `(instance_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub job_type: JobType,
    /// Raw color token reported by the remote master
    pub color: String,
    pub description: String,
    pub buildable: bool,
    pub in_queue: bool,
    pub last_build_number: i32,
    pub last_build_status: BuildStatus,
    pub last_build_time: Option<DateTime<Utc>>,
    /// 0-100
    pub health_score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of remote job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Freestyle,
    Pipeline,
    Multibranch,
    Folder,
    Maven,
}

impl JobType {
    /// Map a remote `_class` name to a job type
    pub fn from_class(class_name: &str) -> Self {
        if class_name.contains("WorkflowMultiBranchProject") {
            JobType::Multibranch
        } else if class_name.contains("WorkflowJob") {
            JobType::Pipeline
        } else if class_name.contains("Folder") {
            JobType::Folder
        } else if class_name.contains("MavenModuleSet") {
            JobType::Maven
        } else {
            JobType::Freestyle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Freestyle => "freestyle",
            JobType::Pipeline => "pipeline",
            JobType::Multibranch => "multibranch",
            JobType::Folder => "folder",
            JobType::Maven => "maven",
        }
    }

    /// Parse a stored type string; unrecognized values read as `Freestyle`
    pub fn parse(s: &str) -> Self {
        match s {
            "pipeline" => JobType::Pipeline,
            "multibranch" => JobType::Multibranch,
            "folder" => JobType::Folder,
            "maven" => JobType::Maven,
            _ => JobType::Freestyle,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
