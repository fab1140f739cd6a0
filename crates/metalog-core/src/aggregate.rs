//! Aggregation over task rows: run list, per-id status counts, process rows.
//!
//! Every function here is a pure fold over what the store returned in the
//! current pass. Nothing is cached between passes.

use crate::{
    IdSummary, MetadataView, MetalogSource, ProcessRow, QueryError, RunInfo, TaskStatus,
    ViewSnapshot,
};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Groups `(run_name, ingested, tasks)` rows into runs with their latest
/// ingestion time and task count, ordered by [`order_runs`]. A run may
/// appear on several rows; their counts are added.
pub fn collect_runs<I>(rows: I) -> Vec<RunInfo>
where
    I: IntoIterator<Item = (String, NaiveDateTime, u64)>,
{
    let mut by_run: BTreeMap<String, RunInfo> = BTreeMap::new();
    for (run_name, ingested, tasks) in rows {
        let entry = by_run.entry(run_name).or_insert_with_key(|name| RunInfo {
            run_name: name.clone(),
            last_ingested: ingested,
            total_tasks: 0,
        });
        entry.last_ingested = entry.last_ingested.max(ingested);
        entry.total_tasks += tasks;
    }
    order_runs(by_run.into_values().collect())
}

/// Most recently ingested first; ties broken by run name.
pub fn order_runs(mut runs: Vec<RunInfo>) -> Vec<RunInfo> {
    runs.sort_by(|a, b| {
        b.last_ingested
            .cmp(&a.last_ingested)
            .then_with(|| a.run_name.cmp(&b.run_name))
    });
    runs
}

pub fn most_recent_run(runs: &[RunInfo]) -> Option<&RunInfo> {
    runs.iter().min_by(|a, b| {
        b.last_ingested
            .cmp(&a.last_ingested)
            .then_with(|| a.run_name.cmp(&b.run_name))
    })
}

/// Folds `(id, raw status, count)` rows into one summary per id, ordered by
/// id. Raw statuses that map onto the same [`TaskStatus`] are added together.
pub fn summarize_status_counts<I, S>(rows: I) -> Vec<IdSummary>
where
    I: IntoIterator<Item = (String, S, u64)>,
    S: AsRef<str>,
{
    let mut by_id: BTreeMap<String, IdSummary> = BTreeMap::new();
    for (id, raw_status, count) in rows {
        by_id
            .entry(id)
            .or_insert_with_key(|id| IdSummary::new(id.clone()))
            .record(TaskStatus::from_raw(raw_status.as_ref()), count);
    }
    by_id.into_values().collect()
}

/// Ingestion time, then task id, then process name. Unchanged content keeps
/// every row at the same position across refreshes.
pub fn order_processes(mut rows: Vec<ProcessRow>) -> Vec<ProcessRow> {
    rows.sort_by(|a, b| {
        a.ingested
            .cmp(&b.ingested)
            .then_with(|| a.task_id.cmp(&b.task_id))
            .then_with(|| a.process.cmp(&b.process))
    });
    rows
}

/// Keeps one row per task id, the one [`is_newer`] ranks highest, in
/// [`order_processes`] order. The cursor and the metadata pane then always
/// refer to the same record.
pub fn latest_per_task(rows: Vec<ProcessRow>) -> Vec<ProcessRow> {
    let mut by_task: BTreeMap<String, ProcessRow> = BTreeMap::new();
    for row in rows {
        let keep = by_task.get(&row.task_id).map_or(true, |current| {
            is_newer(
                (row.ingested, row.raw_status.as_str(), row.process.as_str()),
                (current.ingested, current.raw_status.as_str(), current.process.as_str()),
            )
        });
        if keep {
            by_task.insert(row.task_id.clone(), row);
        }
    }
    order_processes(by_task.into_values().collect())
}

/// Recency rule shared by the process list and task lookup: later
/// ingestion wins, then raw status, then process name.
pub fn is_newer(
    candidate: (NaiveDateTime, &str, &str),
    current: (NaiveDateTime, &str, &str),
) -> bool {
    candidate > current
}

/// Missing, blank or unparseable metadata is an empty document.
pub fn parse_metadata(raw: Option<&str>) -> Value {
    raw.map(str::trim)
        .filter(|text| !text.is_empty())
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

pub fn is_empty_document(doc: &Value) -> bool {
    match doc {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// One aggregation pass below an already-fetched run list: id summaries for
/// `run` when it is one of `runs`, process rows for `id` when it is one of
/// those summaries. Any failing query fails the whole pass.
pub fn aggregate<S>(
    source: &S,
    runs: Vec<RunInfo>,
    run: Option<&str>,
    id: Option<&str>,
) -> Result<ViewSnapshot, QueryError>
where
    S: MetalogSource + ?Sized,
{
    let run = run.filter(|name| runs.iter().any(|info| info.run_name == *name));
    let ids = match run {
        Some(run) => source.summarize_ids(run)?,
        None => Vec::new(),
    };
    let id = id.filter(|id| ids.iter().any(|summary| summary.id == *id));
    let processes = match (run, id) {
        (Some(run), Some(id)) => source.list_processes(run, id)?,
        _ => Vec::new(),
    };

    Ok(ViewSnapshot {
        runs,
        run: run.map(str::to_string),
        ids,
        id: id.map(str::to_string),
        processes,
        task_id: None,
        metadata: MetadataView::NoSelection,
    })
}
