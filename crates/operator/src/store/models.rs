use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::policy::{Action, Condition};

/// A remediation job, created on a successful policy match and owned by the
/// queue until a worker claims it. The resolution is frozen at enqueue time:
/// workers never re-read the alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub policy_id: i64,
    pub policy_name: String,
    pub tool: String,
    pub target_key: String,
    pub resolved_params: HashMap<String, String>,
    pub alert_fingerprint: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub result_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Dispatched,
    Running,
    Retrying,
    Succeeded,
    FailedTerminal,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::FailedTerminal)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Dispatched => "dispatched",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedTerminal => "failed_terminal",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "dispatched" => Ok(JobStatus::Dispatched),
            "running" => Ok(JobStatus::Running),
            "retrying" => Ok(JobStatus::Retrying),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed_terminal" => Ok(JobStatus::FailedTerminal),
            other => Err(crate::Error::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// One append-only audit record, written when a job reaches a terminal
/// state. This is the externally visible outcome trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub action: String,
    pub target: String,
    pub status: String,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload for inserting a policy (seed path; CRUD otherwise lives outside
/// this service).
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub name: String,
    pub condition: Condition,
    pub action: Action,
    pub priority: i32,
}
