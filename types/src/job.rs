use serde::{Deserialize, Serialize};

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Cron,
    Interval,
    At,
    Delay,
    Preset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Cancelled,
}

/// Serializable snapshot of a `ScheduledJob`, returned by `list()`/`get(id)`
/// and usable by the admin surface without exposing the handler capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub expression: String,
    pub status: JobStatus,
    /// ms since epoch, server-local computation (spec §9 Timezones note).
    pub next_run: Option<i64>,
    pub last_run: Option<i64>,
    pub exec_count: u64,
    pub last_error: Option<String>,
}
