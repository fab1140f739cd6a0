use crate::aggregate::{collect_runs, is_newer, latest_per_task, summarize_status_counts};
use crate::{
    IdSummary, MetalogSource, ProcessRow, QueryError, RunInfo, TaskRecord, TaskStatus,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use std::cell::{Cell, RefCell};

pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 15)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("valid timestamp")
}

pub fn task(
    run: &str,
    id: &str,
    ingested: NaiveDateTime,
    process: &str,
    task_id: &str,
    status: &str,
) -> TaskRecord {
    TaskRecord {
        run_name: run.to_string(),
        id: id.to_string(),
        ingested,
        process: process.to_string(),
        task_id: task_id.to_string(),
        status: TaskStatus::from_raw(status),
        raw_status: status.to_string(),
        metadata: json!({ "task": task_id }),
    }
}

/// In-memory task log with a switch that makes every query fail.
pub struct FakeStore {
    tasks: RefCell<Vec<TaskRecord>>,
    offline: Cell<bool>,
}

impl FakeStore {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self {
            tasks: RefCell::new(tasks),
            offline: Cell::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    pub fn push(&self, record: TaskRecord) {
        self.tasks.borrow_mut().push(record);
    }

    pub fn remove_task(&self, task_id: &str) {
        self.tasks.borrow_mut().retain(|record| record.task_id != task_id);
    }

    fn check(&self) -> Result<(), QueryError> {
        if self.offline.get() {
            return Err(QueryError::unavailable("fake store offline"));
        }
        Ok(())
    }
}

impl MetalogSource for FakeStore {
    fn list_runs(&self) -> Result<Vec<RunInfo>, QueryError> {
        self.check()?;
        Ok(collect_runs(
            self.tasks
                .borrow()
                .iter()
                .map(|record| (record.run_name.clone(), record.ingested, 1)),
        ))
    }

    fn summarize_ids(&self, run: &str) -> Result<Vec<IdSummary>, QueryError> {
        self.check()?;
        Ok(summarize_status_counts(
            self.tasks
                .borrow()
                .iter()
                .filter(|record| record.run_name == run)
                .map(|record| (record.id.clone(), record.raw_status.clone(), 1)),
        ))
    }

    fn list_processes(&self, run: &str, id: &str) -> Result<Vec<ProcessRow>, QueryError> {
        self.check()?;
        Ok(latest_per_task(
            self.tasks
                .borrow()
                .iter()
                .filter(|record| record.run_name == run && record.id == id)
                .map(ProcessRow::from)
                .collect(),
        ))
    }

    fn fetch_task(
        &self,
        run: &str,
        id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, QueryError> {
        self.check()?;
        Ok(self
            .tasks
            .borrow()
            .iter()
            .filter(|record| {
                record.run_name == run && record.id == id && record.task_id == task_id
            })
            .fold(None::<&TaskRecord>, |latest, record| match latest {
                Some(current)
                    if !is_newer(
                        (record.ingested, record.raw_status.as_str(), record.process.as_str()),
                        (current.ingested, current.raw_status.as_str(), current.process.as_str()),
                    ) =>
                {
                    Some(current)
                }
                _ => Some(record),
            })
            .cloned())
    }
}
