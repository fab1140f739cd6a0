use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod aggregate;
pub mod reconcile;
pub mod selection;

#[cfg(test)]
pub(crate) mod testing;

pub use reconcile::{reconcile, Reconciled};
pub use selection::{Selection, SelectionLevel};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Running,
    Other,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Other
    }
}

impl TaskStatus {
    /// Display order of the status columns.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Running,
        TaskStatus::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Running => "running",
            TaskStatus::Other => "other",
        }
    }

    /// Maps a raw `status` column value onto the four recognized statuses.
    /// Anything unrecognized (SUBMITTED, CACHED, empty) is `Other`.
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw.trim();
        if normalized.eq_ignore_ascii_case("completed") {
            TaskStatus::Completed
        } else if normalized.eq_ignore_ascii_case("failed") {
            TaskStatus::Failed
        } else if normalized.eq_ignore_ascii_case("running") {
            TaskStatus::Running
        } else {
            TaskStatus::Other
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub run_name: String,
    pub id: String,
    pub ingested: NaiveDateTime,
    pub process: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub raw_status: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    pub run_name: String,
    pub last_ingested: NaiveDateTime,
    pub total_tasks: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    pub other: u64,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Running => self.running,
            TaskStatus::Other => self.other,
        }
    }

    fn slot_mut(&mut self, status: TaskStatus) -> &mut u64 {
        match status {
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Other => &mut self.other,
        }
    }

    pub fn sum(&self) -> u64 {
        self.completed + self.failed + self.running + self.other
    }

    /// Counts in the fixed completed, failed, running, other order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskStatus, u64)> + '_ {
        TaskStatus::ALL
            .into_iter()
            .map(move |status| (status, self.get(status)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdSummary {
    pub id: String,
    pub counts: StatusCounts,
    pub total: u64,
}

impl IdSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counts: StatusCounts::default(),
            total: 0,
        }
    }

    /// Adds `count` tasks of `status`; keeps `total` equal to the sum of counts.
    pub fn record(&mut self, status: TaskStatus, count: u64) {
        *self.counts.slot_mut(status) += count;
        self.total += count;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRow {
    pub process: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub raw_status: String,
    pub ingested: NaiveDateTime,
}

impl From<&TaskRecord> for ProcessRow {
    fn from(record: &TaskRecord) -> Self {
        Self {
            process: record.process.clone(),
            task_id: record.task_id.clone(),
            status: record.status,
            raw_status: record.raw_status.clone(),
            ingested: record.ingested,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum MetadataView {
    #[default]
    NoSelection,
    Loaded(Value),
    NotFound,
}

/// One consistent aggregation pass. `run`, `id` and `task_id` name the
/// selection the dependent lists were computed for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub runs: Vec<RunInfo>,
    pub run: Option<String>,
    pub ids: Vec<IdSummary>,
    pub id: Option<String>,
    pub processes: Vec<ProcessRow>,
    pub task_id: Option<String>,
    pub metadata: MetadataView,
}

impl ViewSnapshot {
    pub fn process(&self, task_id: &str) -> Option<&ProcessRow> {
        self.processes.iter().find(|row| row.task_id == task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl QueryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }
}

/// Read-only queries against the task log. Empty runs, ids and process
/// lists come back as empty containers; only an unreachable store errors.
pub trait MetalogSource {
    fn list_runs(&self) -> Result<Vec<RunInfo>, QueryError>;

    fn summarize_ids(&self, run: &str) -> Result<Vec<IdSummary>, QueryError>;

    fn list_processes(&self, run: &str, id: &str) -> Result<Vec<ProcessRow>, QueryError>;

    fn fetch_task(
        &self,
        run: &str,
        id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, QueryError>;

    fn fetch_metadata(
        &self,
        run: &str,
        id: &str,
        task_id: &str,
    ) -> Result<Option<Value>, QueryError> {
        Ok(self
            .fetch_task(run, id, task_id)?
            .map(|record| record.metadata))
    }
}

/// Parses an `ingested` column value. Offsets are normalised to UTC; naive
/// values are taken as-is. Accepts `T` or space separators and optional
/// fractional seconds.
pub fn parse_ingested(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc).naive_utc());
    }
    if let Ok(ts) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc).naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}
