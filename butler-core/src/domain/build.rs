//! Build domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One execution of a job, mirrored from a remote master
///
/// Identity is `(job_id, build_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub job_id: Uuid,
    pub build_number: i32,
    pub status: BuildStatus,
    pub url: String,
    /// Duration in milliseconds
    pub duration: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a build, also used for a job's last build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
    Unstable,
    Aborted,
    NotBuilt,
    Running,
}

impl BuildStatus {
    /// Derive a status from a remote job color token
    ///
    /// Animated colors (`blue_anime`, `red_anime`, ...) mean a build is in progress,
    /// so `anime` is checked before the base colors.
    pub fn from_color(color: &str) -> Self {
        let color = color.to_ascii_lowercase();
        if color.contains("anime") {
            BuildStatus::Running
        } else if color.contains("blue") {
            BuildStatus::Success
        } else if color.contains("red") {
            BuildStatus::Failure
        } else if color.contains("yellow") {
            BuildStatus::Unstable
        } else if color.contains("aborted") {
            BuildStatus::Aborted
        } else {
            BuildStatus::NotBuilt
        }
    }

    /// Map a remote build `result` field
    ///
    /// A missing result means the build has not finished yet.
    pub fn from_result(result: Option<&str>) -> Self {
        let Some(result) = result else {
            return BuildStatus::Running;
        };

        match result.to_ascii_uppercase().as_str() {
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" => BuildStatus::Failure,
            "UNSTABLE" => BuildStatus::Unstable,
            "ABORTED" => BuildStatus::Aborted,
            "NOT_BUILT" => BuildStatus::NotBuilt,
            _ => BuildStatus::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Unstable => "unstable",
            BuildStatus::Aborted => "aborted",
            BuildStatus::NotBuilt => "not_built",
            BuildStatus::Running => "running",
        }
    }

    /// Parse a stored status string; unrecognized values read as `NotBuilt`
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => BuildStatus::Success,
            "failure" => BuildStatus::Failure,
            "unstable" => BuildStatus::Unstable,
            "aborted" => BuildStatus::Aborted,
            "running" => BuildStatus::Running,
            _ => BuildStatus::NotBuilt,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_mapping() {
        assert_eq!(BuildStatus::from_color("blue"), BuildStatus::Success);
        assert_eq!(BuildStatus::from_color("red_anime"), BuildStatus::Running);
        assert_eq!(BuildStatus::from_color("yellow"), BuildStatus::Unstable);
        assert_eq!(BuildStatus::from_color("aborted"), BuildStatus::Aborted);
        assert_eq!(BuildStatus::from_color("notbuilt"), BuildStatus::NotBuilt);
    }

    #[test]
    fn test_color_mapping_edge_cases() {
        assert_eq!(BuildStatus::from_color("blue_anime"), BuildStatus::Running);
        assert_eq!(BuildStatus::from_color("red"), BuildStatus::Failure);
        assert_eq!(BuildStatus::from_color("disabled"), BuildStatus::NotBuilt);
        assert_eq!(BuildStatus::from_color(""), BuildStatus::NotBuilt);
    }

    #[test]
    fn test_result_mapping() {
        assert_eq!(BuildStatus::from_result(None), BuildStatus::Running);
        assert_eq!(BuildStatus::from_result(Some("SUCCESS")), BuildStatus::Success);
        assert_eq!(BuildStatus::from_result(Some("failure")), BuildStatus::Failure);
        assert_eq!(BuildStatus::from_result(Some("Unstable")), BuildStatus::Unstable);
        assert_eq!(BuildStatus::from_result(Some("ABORTED")), BuildStatus::Aborted);
        assert_eq!(BuildStatus::from_result(Some("NOT_BUILT")), BuildStatus::NotBuilt);
        assert_eq!(BuildStatus::from_result(Some("SOMETHING_NEW")), BuildStatus::Running);
    }

    #[test]
    fn test_status_string_conversion() {
        for status in [
            BuildStatus::Success,
            BuildStatus::Failure,
            BuildStatus::Unstable,
            BuildStatus::Aborted,
            BuildStatus::NotBuilt,
            BuildStatus::Running,
        ] {
            assert_eq!(BuildStatus::parse(status.as_str()), status);
        }
    }
}
