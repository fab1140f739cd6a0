//! Drill-down selection: run, then id within the run, then task within the id.
//!
//! Each level only exists in the context of the one above it, so the states
//! are an enum rather than three independent optionals. Transitions consume
//! the current value and return the next one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Selection {
    #[default]
    NoRun,
    RunChosen {
        run: String,
    },
    IdChosen {
        run: String,
        id: String,
    },
    ProcessChosen {
        run: String,
        id: String,
        task_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SelectionLevel {
    NoRun,
    RunChosen,
    IdChosen,
    ProcessChosen,
}

impl Selection {
    pub fn level(&self) -> SelectionLevel {
        match self {
            Selection::NoRun => SelectionLevel::NoRun,
            Selection::RunChosen { .. } => SelectionLevel::RunChosen,
            Selection::IdChosen { .. } => SelectionLevel::IdChosen,
            Selection::ProcessChosen { .. } => SelectionLevel::ProcessChosen,
        }
    }

    pub fn run(&self) -> Option<&str> {
        match self {
            Selection::NoRun => None,
            Selection::RunChosen { run }
            | Selection::IdChosen { run, .. }
            | Selection::ProcessChosen { run, .. } => Some(run.as_str()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Selection::IdChosen { id, .. } | Selection::ProcessChosen { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Selection::ProcessChosen { task_id, .. } => Some(task_id.as_str()),
            _ => None,
        }
    }

    /// Choosing a run always drops the id and task below it.
    pub fn select_run(self, run: impl Into<String>) -> Self {
        Selection::RunChosen { run: run.into() }
    }

    /// Ignored when no run is chosen.
    pub fn select_id(self, id: impl Into<String>) -> Self {
        match self {
            Selection::NoRun => Selection::NoRun,
            Selection::RunChosen { run }
            | Selection::IdChosen { run, .. }
            | Selection::ProcessChosen { run, .. } => Selection::IdChosen { run, id: id.into() },
        }
    }

    /// Ignored when no id is chosen.
    pub fn select_task(self, task_id: impl Into<String>) -> Self {
        match self {
            Selection::IdChosen { run, id } | Selection::ProcessChosen { run, id, .. } => {
                Selection::ProcessChosen {
                    run,
                    id,
                    task_id: task_id.into(),
                }
            }
            other => other,
        }
    }

    pub fn clear_run(self) -> Self {
        Selection::NoRun
    }

    pub fn clear_id(self) -> Self {
        match self {
            Selection::NoRun => Selection::NoRun,
            Selection::RunChosen { run }
            | Selection::IdChosen { run, .. }
            | Selection::ProcessChosen { run, .. } => Selection::RunChosen { run },
        }
    }

    pub fn clear_task(self) -> Self {
        match self {
            Selection::ProcessChosen { run, id, .. } => Selection::IdChosen { run, id },
            other => other,
        }
    }
}
