use crate::refresh::{RefreshOutcome, RefreshRequest};
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use metalog_core::{Selection, ViewSnapshot};
use ratatui::widgets::{ListState, TableState};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusPane {
    #[default]
    Runs,
    Ids,
    Processes,
    Metadata,
}

impl FocusPane {
    pub fn next(self) -> Self {
        match self {
            FocusPane::Runs => FocusPane::Ids,
            FocusPane::Ids => FocusPane::Processes,
            FocusPane::Processes => FocusPane::Metadata,
            FocusPane::Metadata => FocusPane::Runs,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            FocusPane::Runs => FocusPane::Metadata,
            FocusPane::Ids => FocusPane::Runs,
            FocusPane::Processes => FocusPane::Ids,
            FocusPane::Metadata => FocusPane::Processes,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            FocusPane::Runs => "Runs",
            FocusPane::Ids => "Ids",
            FocusPane::Processes => "Processes",
            FocusPane::Metadata => "Metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Timer,
    Manual,
    Navigation,
}

pub struct App {
    pub selection: Selection,
    pub snapshot: ViewSnapshot,
    pub focus: FocusPane,
    pub run_list_state: ListState,
    pub id_table_state: TableState,
    pub process_table_state: TableState,
    pub metadata_scroll: u16,
    pub metadata_max_scroll: u16,
    pub last_refresh: Option<DateTime<Local>>,
    pub last_error: Option<String>,
    pub show_help: bool,
    pub source_label: String,
    epoch: u64,
    refresh_pending: bool,
    refresh_in_flight: bool,
    timer_reset: bool,
    should_quit: bool,
}

impl App {
    /// Starts with nothing selected and the first refresh already queued.
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            selection: Selection::NoRun,
            snapshot: ViewSnapshot::default(),
            focus: FocusPane::Runs,
            run_list_state: ListState::default(),
            id_table_state: TableState::default(),
            process_table_state: TableState::default(),
            metadata_scroll: 0,
            metadata_max_scroll: 0,
            last_refresh: None,
            last_error: None,
            show_help: false,
            source_label: source_label.into(),
            epoch: 0,
            refresh_pending: true,
            refresh_in_flight: false,
            timer_reset: false,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_flight
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
            }
            KeyCode::Esc => {
                self.show_help = false;
            }
            _ if self.show_help => {}
            KeyCode::Char('r') => {
                self.request_refresh(RefreshTrigger::Manual);
            }
            KeyCode::Tab => {
                self.focus = self.focus.next();
            }
            KeyCode::BackTab => {
                self.focus = self.focus.prev();
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.navigate(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.navigate(-1);
            }
            _ => {}
        }
    }

    pub fn request_refresh(&mut self, trigger: RefreshTrigger) {
        match trigger {
            RefreshTrigger::Timer => {
                if self.refresh_in_flight || self.refresh_pending {
                    debug!("refresh tick dropped; one is already in flight");
                    return;
                }
            }
            RefreshTrigger::Manual => {
                self.timer_reset = true;
            }
            RefreshTrigger::Navigation => {}
        }
        if self.refresh_in_flight {
            debug!(?trigger, "refresh queued behind in-flight pass");
        }
        self.refresh_pending = true;
    }

    /// Hands out the queued refresh, if any, once nothing is in flight.
    pub fn take_refresh_request(&mut self) -> Option<RefreshRequest> {
        if !self.refresh_pending || self.refresh_in_flight {
            return None;
        }
        self.refresh_pending = false;
        self.refresh_in_flight = true;
        debug!(epoch = self.epoch, level = ?self.selection.level(), "refresh requested");
        Some(RefreshRequest {
            epoch: self.epoch,
            selection: self.selection.clone(),
        })
    }

    pub fn take_timer_reset(&mut self) -> bool {
        std::mem::take(&mut self.timer_reset)
    }

    pub fn apply_refresh(&mut self, outcome: RefreshOutcome) {
        self.refresh_in_flight = false;

        if outcome.epoch < self.epoch {
            debug!(
                outcome_epoch = outcome.epoch,
                epoch = self.epoch,
                "stale refresh discarded"
            );
            self.refresh_pending = true;
            return;
        }

        match outcome.result {
            Ok(reconciled) => {
                if reconciled.selection != self.selection {
                    info!(
                        from = ?self.selection.level(),
                        to = ?reconciled.selection.level(),
                        "selection reconciled"
                    );
                }
                if reconciled.snapshot.task_id != self.snapshot.task_id {
                    self.metadata_scroll = 0;
                }
                self.selection = reconciled.selection;
                self.snapshot = reconciled.snapshot;
                self.last_error = None;
                self.last_refresh = Some(Local::now());
                self.sync_cursors();
                debug!(epoch = outcome.epoch, runs = self.snapshot.runs.len(), "refresh applied");
            }
            Err(err) => {
                warn!(error = %err, "refresh failed; keeping last snapshot");
                self.last_error = Some(err.to_string());
            }
        }
    }

    pub fn ids_current(&self) -> bool {
        self.selection.run().is_some() && self.snapshot.run.as_deref() == self.selection.run()
    }

    pub fn processes_current(&self) -> bool {
        self.selection.id().is_some()
            && self.ids_current()
            && self.snapshot.id.as_deref() == self.selection.id()
    }

    pub fn metadata_current(&self) -> bool {
        self.selection.task_id().is_some()
            && self.processes_current()
            && self.snapshot.task_id.as_deref() == self.selection.task_id()
    }

    /// Points the list cursors at the selected entities. Panes showing data
    /// for another selection lose their cursor.
    pub fn sync_cursors(&mut self) {
        let run = self.selection.run().and_then(|run| {
            self.snapshot
                .runs
                .iter()
                .position(|info| info.run_name == run)
        });
        self.run_list_state.select(run);

        let id = if self.ids_current() {
            self.selection
                .id()
                .and_then(|id| self.snapshot.ids.iter().position(|row| row.id == id))
        } else {
            None
        };
        self.id_table_state.select(id);

        let task = if self.processes_current() {
            self.selection.task_id().and_then(|task_id| {
                self.snapshot
                    .processes
                    .iter()
                    .position(|row| row.task_id == task_id)
            })
        } else {
            None
        };
        self.process_table_state.select(task);
    }

    fn navigate(&mut self, delta: isize) {
        match self.focus {
            FocusPane::Runs => self.move_run(delta),
            FocusPane::Ids => self.move_id(delta),
            FocusPane::Processes => self.move_process(delta),
            FocusPane::Metadata => self.scroll_metadata(delta),
        }
    }

    fn move_run(&mut self, delta: isize) {
        let runs = &self.snapshot.runs;
        let current = self
            .selection
            .run()
            .and_then(|run| runs.iter().position(|info| info.run_name == run));
        let Some(next) = step_index(current, runs.len(), delta) else {
            return;
        };
        let run = runs[next].run_name.clone();
        self.change_selection(self.selection.clone().select_run(run));
    }

    fn move_id(&mut self, delta: isize) {
        if !self.ids_current() {
            return;
        }
        let ids = &self.snapshot.ids;
        let current = self
            .selection
            .id()
            .and_then(|id| ids.iter().position(|row| row.id == id));
        let Some(next) = step_index(current, ids.len(), delta) else {
            return;
        };
        let id = ids[next].id.clone();
        self.change_selection(self.selection.clone().select_id(id));
    }

    fn move_process(&mut self, delta: isize) {
        if !self.processes_current() {
            return;
        }
        let processes = &self.snapshot.processes;
        let current = self
            .selection
            .task_id()
            .and_then(|task_id| processes.iter().position(|row| row.task_id == task_id));
        let Some(next) = step_index(current, processes.len(), delta) else {
            return;
        };
        let task_id = processes[next].task_id.clone();
        self.change_selection(self.selection.clone().select_task(task_id));
    }

    fn scroll_metadata(&mut self, delta: isize) {
        if delta < 0 {
            self.metadata_scroll = self.metadata_scroll.saturating_sub(1);
        } else {
            let next = self.metadata_scroll.saturating_add(1);
            self.metadata_scroll = next.min(self.metadata_max_scroll);
        }
    }

    fn change_selection(&mut self, next: Selection) {
        if next == self.selection {
            return;
        }
        self.selection = next;
        self.epoch += 1;
        self.metadata_scroll = 0;
        self.metadata_max_scroll = 0;
        self.sync_cursors();
        self.request_refresh(RefreshTrigger::Navigation);
    }
}

fn step_index(current: Option<usize>, len: usize, delta: isize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let len = len as isize;
    let next = match current {
        Some(index) => (index as isize + delta).rem_euclid(len),
        None if delta < 0 => len - 1,
        None => 0,
    };
    Some(next as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use metalog_core::{
        IdSummary, MetadataView, ProcessRow, QueryError, Reconciled, RunInfo, SelectionLevel,
        TaskStatus,
    };
    use serde_json::json;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn at(hour: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .expect("valid timestamp")
    }

    fn process(task_id: &str, hour: u32) -> ProcessRow {
        ProcessRow {
            process: format!("step-{task_id}"),
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            raw_status: "COMPLETED".to_string(),
            ingested: at(hour),
        }
    }

    /// Snapshot consistent with `selection` over runs A and B; run A has ids
    /// X and Y, and X has tasks t1 and t2.
    fn snapshot_for(selection: &Selection) -> ViewSnapshot {
        let mut snapshot = ViewSnapshot {
            runs: vec![
                RunInfo {
                    run_name: "A".to_string(),
                    last_ingested: at(10),
                    total_tasks: 3,
                },
                RunInfo {
                    run_name: "B".to_string(),
                    last_ingested: at(8),
                    total_tasks: 1,
                },
            ],
            ..ViewSnapshot::default()
        };
        if selection.run() == Some("A") {
            snapshot.run = Some("A".to_string());
            let mut x = IdSummary::new("X");
            x.record(TaskStatus::Completed, 2);
            let mut y = IdSummary::new("Y");
            y.record(TaskStatus::Running, 1);
            snapshot.ids = vec![x, y];
        }
        if selection.run() == Some("A") && selection.id() == Some("X") {
            snapshot.id = Some("X".to_string());
            snapshot.processes = vec![process("t1", 9), process("t2", 10)];
        }
        if let Some(task_id) = selection.task_id() {
            snapshot.task_id = Some(task_id.to_string());
            snapshot.metadata = MetadataView::Loaded(json!({ "task": task_id }));
        }
        snapshot
    }

    fn land(app: &mut App, selection: Selection) {
        let request = app.take_refresh_request().expect("refresh queued");
        let snapshot = snapshot_for(&selection);
        app.apply_refresh(RefreshOutcome {
            epoch: request.epoch,
            result: Ok(Reconciled {
                selection,
                snapshot,
            }),
        });
    }

    #[test]
    fn quits_on_q_and_ctrl_c() {
        let mut app = App::new("test.db");
        app.handle_key(key(KeyCode::Char('q')));
        assert!(app.should_quit());

        let mut app = App::new("test.db");
        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit());
    }

    #[test]
    fn first_refresh_is_queued_at_startup() {
        let mut app = App::new("test.db");
        let request = app.take_refresh_request().expect("initial refresh");
        assert_eq!(request.epoch, 0);
        assert_eq!(request.selection, Selection::NoRun);
        assert!(app.is_refreshing());
        assert!(app.take_refresh_request().is_none());
    }

    #[test]
    fn timer_ticks_during_a_refresh_are_dropped() {
        let mut app = App::new("test.db");
        land(&mut app, Selection::NoRun.select_run("A"));

        app.request_refresh(RefreshTrigger::Timer);
        let _in_flight = app.take_refresh_request().expect("tick refresh");
        app.request_refresh(RefreshTrigger::Timer);
        app.request_refresh(RefreshTrigger::Timer);

        app.apply_refresh(RefreshOutcome {
            epoch: app.epoch,
            result: Err(QueryError::unavailable("locked")),
        });
        assert!(app.take_refresh_request().is_none());
    }

    #[test]
    fn manual_refresh_during_a_refresh_is_queued_once() {
        let mut app = App::new("test.db");
        let _in_flight = app.take_refresh_request().expect("initial refresh");

        app.handle_key(key(KeyCode::Char('r')));
        app.handle_key(key(KeyCode::Char('r')));
        assert!(app.take_timer_reset());
        assert!(!app.take_timer_reset());
        assert!(app.take_refresh_request().is_none());

        app.apply_refresh(RefreshOutcome {
            epoch: 0,
            result: Ok(Reconciled {
                selection: Selection::NoRun.select_run("A"),
                snapshot: snapshot_for(&Selection::NoRun.select_run("A")),
            }),
        });
        assert!(app.take_refresh_request().is_some());
        assert!(app.take_refresh_request().is_none());
    }

    #[test]
    fn navigation_selects_first_id_and_shows_loading_until_refresh_lands() {
        let mut app = App::new("test.db");
        land(&mut app, Selection::NoRun.select_run("A"));

        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Ids);
        assert!(app.take_refresh_request().is_none());

        app.handle_key(key(KeyCode::Char('j')));
        assert_eq!(app.selection.id(), Some("X"));
        assert_eq!(app.epoch, 1);
        assert!(app.ids_current());
        assert!(!app.processes_current());

        let request = app.take_refresh_request().expect("navigation refresh");
        assert_eq!(request.selection.level(), SelectionLevel::IdChosen);
        app.apply_refresh(RefreshOutcome {
            epoch: request.epoch,
            result: Ok(Reconciled {
                selection: request.selection.clone(),
                snapshot: snapshot_for(&request.selection),
            }),
        });
        assert!(app.processes_current());
        assert_eq!(app.id_table_state.selected(), Some(0));
    }

    #[test]
    fn stale_outcome_is_discarded_and_refresh_requeued() {
        let mut app = App::new("test.db");
        land(&mut app, Selection::NoRun.select_run("A"));

        app.request_refresh(RefreshTrigger::Timer);
        let stale = app.take_refresh_request().expect("tick refresh");

        app.focus = FocusPane::Runs;
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selection.run(), Some("B"));

        app.apply_refresh(RefreshOutcome {
            epoch: stale.epoch,
            result: Ok(Reconciled {
                selection: stale.selection.clone(),
                snapshot: snapshot_for(&stale.selection),
            }),
        });
        assert_eq!(app.selection.run(), Some("B"));

        let fresh = app.take_refresh_request().expect("requeued refresh");
        assert_eq!(fresh.epoch, 1);
        assert_eq!(fresh.selection.run(), Some("B"));
    }

    #[test]
    fn process_navigation_reaches_every_row_and_wraps() {
        let mut app = App::new("test.db");
        let selection = Selection::NoRun.select_run("A").select_id("X");
        let mut snapshot = snapshot_for(&selection);
        snapshot.processes = vec![process("t2", 9), process("t1", 10), process("t3", 11)];
        let request = app.take_refresh_request().expect("initial refresh");
        app.apply_refresh(RefreshOutcome {
            epoch: request.epoch,
            result: Ok(Reconciled {
                selection,
                snapshot,
            }),
        });

        app.focus = FocusPane::Processes;
        let mut visited = Vec::new();
        for _ in 0..4 {
            app.handle_key(key(KeyCode::Down));
            let cursor = app.process_table_state.selected();
            let highlighted = cursor.map(|index| app.snapshot.processes[index].task_id.as_str());
            assert_eq!(highlighted, app.selection.task_id());
            visited.push(cursor);
        }
        assert_eq!(visited, vec![Some(0), Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn run_navigation_wraps_around() {
        let mut app = App::new("test.db");
        land(&mut app, Selection::NoRun.select_run("A"));

        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selection.run(), Some("B"));
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selection.run(), Some("A"));
        assert_eq!(app.run_list_state.selected(), Some(0));
    }

    #[test]
    fn failed_refresh_keeps_last_snapshot_until_recovery() {
        let mut app = App::new("test.db");
        let selection = Selection::NoRun.select_run("A").select_id("X").select_task("t2");
        land(&mut app, selection.clone());
        let before = app.snapshot.clone();

        app.handle_key(key(KeyCode::Char('r')));
        let request = app.take_refresh_request().expect("manual refresh");
        app.apply_refresh(RefreshOutcome {
            epoch: request.epoch,
            result: Err(QueryError::unavailable("database is locked")),
        });
        assert_eq!(app.snapshot, before);
        assert_eq!(app.selection, selection);
        assert_eq!(
            app.last_error.as_deref(),
            Some("store unavailable: database is locked")
        );

        app.request_refresh(RefreshTrigger::Timer);
        land(&mut app, selection);
        assert!(app.last_error.is_none());
        assert!(app.metadata_current());
    }

    #[test]
    fn help_overlay_swallows_navigation() {
        let mut app = App::new("test.db");
        land(&mut app, Selection::NoRun.select_run("A"));

        app.handle_key(key(KeyCode::Char('?')));
        app.handle_key(key(KeyCode::Char('j')));
        assert_eq!(app.selection.run(), Some("A"));
        app.handle_key(key(KeyCode::Esc));
        assert!(!app.show_help);
    }

    #[test]
    fn metadata_scroll_is_clamped() {
        let mut app = App::new("test.db");
        app.focus = FocusPane::Metadata;
        app.metadata_max_scroll = 1;
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.metadata_scroll, 1);
        app.handle_key(key(KeyCode::Up));
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.metadata_scroll, 0);
    }
}
