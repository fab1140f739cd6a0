//! Merges a fresh aggregation pass into the current selection.
//!
//! A selected entity that still exists stays selected. One that vanished is
//! cleared together with everything below it; it is never swapped for a
//! different entity at the same level. The only automatic choice is the
//! most recent run, and only when no run was selected going in.

use crate::aggregate::{aggregate, most_recent_run};
use crate::{MetadataView, MetalogSource, ProcessRow, QueryError, RunInfo, Selection, ViewSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub selection: Selection,
    pub snapshot: ViewSnapshot,
}

/// Runs one refresh pass. Either every query succeeds and a complete
/// snapshot comes back, or the first failure is returned and the caller
/// keeps whatever it displayed before.
pub fn reconcile<S>(source: &S, current: &Selection) -> Result<Reconciled, QueryError>
where
    S: MetalogSource + ?Sized,
{
    let runs = source.list_runs()?;
    let selection = resolve_run(current, &runs);
    let mut snapshot = aggregate(source, runs, selection.run(), selection.id())?;
    let selection = resolve_id(selection, &snapshot);
    let selection = resolve_task(selection, &snapshot.processes);

    snapshot.task_id = selection.task_id().map(str::to_string);
    if let (Some(run), Some(id), Some(task_id)) =
        (selection.run(), selection.id(), selection.task_id())
    {
        snapshot.metadata = match source.fetch_metadata(run, id, task_id)? {
            Some(doc) => MetadataView::Loaded(doc),
            None => MetadataView::NotFound,
        };
    }

    Ok(Reconciled {
        selection,
        snapshot,
    })
}

fn resolve_run(current: &Selection, runs: &[RunInfo]) -> Selection {
    match current.run() {
        None => match most_recent_run(runs) {
            Some(latest) => Selection::NoRun.select_run(latest.run_name.clone()),
            None => Selection::NoRun,
        },
        Some(run) if runs.iter().any(|info| info.run_name == run) => current.clone(),
        Some(_) => current.clone().clear_run(),
    }
}

fn resolve_id(selection: Selection, snapshot: &ViewSnapshot) -> Selection {
    let dangling = selection
        .id()
        .is_some_and(|id| snapshot.id.as_deref() != Some(id));
    if dangling {
        selection.clear_id()
    } else {
        selection
    }
}

fn resolve_task(selection: Selection, processes: &[ProcessRow]) -> Selection {
    let dangling = selection
        .task_id()
        .is_some_and(|task_id| !processes.iter().any(|row| row.task_id == task_id));
    if dangling {
        selection.clear_task()
    } else {
        selection
    }
}
