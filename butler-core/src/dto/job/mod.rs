//! Job and build reconciliation payloads
//!
//! These are the values the sync engine writes into the mirror. Building them
//! from the same remote payload always yields the same value, which keeps the
//! upserts idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build::BuildStatus;
use crate::domain::job::JobType;
use crate::remote::{RemoteBuild, RemoteJobDetail, RemoteJobSummary, timestamp_from_millis};

/// Job fields upserted on `(instance_id, name)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpsert {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub job_type: JobType,
    pub color: String,
    pub description: String,
    pub buildable: bool,
    pub in_queue: bool,
    pub last_build_number: i32,
    pub last_build_status: BuildStatus,
    pub last_build_time: Option<DateTime<Utc>>,
    pub health_score: i32,
}

impl JobUpsert {
    /// Combine a listing entry with its detail payload
    pub fn from_remote(summary: &RemoteJobSummary, detail: &RemoteJobDetail) -> Self {
        let display_name = detail
            .display_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| summary.name.clone());

        JobUpsert {
            name: summary.name.clone(),
            display_name,
            url: summary.url.clone().unwrap_or_default(),
            job_type: detail.job_type(),
            color: summary.color().to_string(),
            description: detail.description.clone().unwrap_or_default(),
            buildable: detail.buildable.unwrap_or(true),
            in_queue: detail.in_queue.unwrap_or(false),
            last_build_number: summary.last_build.as_ref().map_or(0, |b| b.number),
            last_build_status: summary.status(),
            last_build_time: summary
                .last_build
                .as_ref()
                .and_then(|b| timestamp_from_millis(b.timestamp)),
            health_score: detail.health_score(),
        }
    }
}

/// Build fields upserted on `(job_id, build_number)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildUpsert {
    pub build_number: i32,
    pub status: BuildStatus,
    pub url: String,
    pub duration: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&RemoteBuild> for BuildUpsert {
    fn from(build: &RemoteBuild) -> Self {
        BuildUpsert {
            build_number: build.number,
            status: build.status(),
            url: build.url.clone().unwrap_or_default(),
            duration: build.duration.unwrap_or(0),
            timestamp: timestamp_from_millis(build.timestamp),
        }
    }
}
