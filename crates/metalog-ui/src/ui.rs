use crate::state::{App, FocusPane};
use crate::theme::{self, status_icon, status_style};
use metalog_core::aggregate::is_empty_document;
use metalog_core::{MetadataView, TaskStatus};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, Wrap},
    Frame,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOADING: &str = "loading...";

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let run_rows = app.snapshot.runs.len().clamp(1, 6) as u16;
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(run_rows + 2),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(outer[1]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(middle[0]);

    render_runs(f, app, outer[0]);
    render_ids(f, app, left[0]);
    render_processes(f, app, left[1]);
    render_metadata(f, app, middle[1]);
    render_status_bar(f, app, outer[2]);

    if app.show_help {
        render_help(f, centered_rect(50, 60, area));
    }
}

fn pane_block(app: &App, pane: FocusPane, title: String) -> Block<'static> {
    let border_style = if app.focus == pane {
        theme::FOCUSED_BORDER
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(border_style)
}

fn render_placeholder(f: &mut Frame, area: Rect, message: &str) {
    let p = Paragraph::new(Line::from(Span::styled(message.to_string(), theme::MUTED)))
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn render_runs(f: &mut Frame, app: &mut App, area: Rect) {
    let title = format!("{} ({})", FocusPane::Runs.title(), app.source_label);
    let block = pane_block(app, FocusPane::Runs, title);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if app.snapshot.runs.is_empty() {
        let message = if app.last_refresh.is_none() {
            LOADING
        } else {
            "No runs recorded"
        };
        render_placeholder(f, inner, message);
        return;
    }

    let items: Vec<ListItem> = app
        .snapshot
        .runs
        .iter()
        .map(|info| {
            ListItem::new(Line::from(format!(
                "{} (Last: {}, Tasks: {})",
                info.run_name,
                info.last_ingested.format(TIMESTAMP_FORMAT),
                info.total_tasks
            )))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(theme::SELECTED_STYLE)
        .highlight_symbol("> ");
    f.render_stateful_widget(list, inner, &mut app.run_list_state);
}

fn render_ids(f: &mut Frame, app: &mut App, area: Rect) {
    let title = match app.selection.run() {
        Some(run) => format!("{} in {run}", FocusPane::Ids.title()),
        None => FocusPane::Ids.title().to_string(),
    };
    let block = pane_block(app, FocusPane::Ids, title);

    if app.selection.run().is_none() || !app.ids_current() || app.snapshot.ids.is_empty() {
        let inner = block.inner(area);
        f.render_widget(block, area);
        let message = if app.selection.run().is_none() {
            "No run selected"
        } else if !app.ids_current() {
            LOADING
        } else {
            "No ids in this run"
        };
        render_placeholder(f, inner, message);
        return;
    }

    let rows: Vec<Row> = app
        .snapshot
        .ids
        .iter()
        .enumerate()
        .map(|(idx, summary)| {
            let mut cells = vec![
                Cell::from(summary.id.clone()),
                Cell::from(summary.total.to_string()),
            ];
            cells.extend(summary.counts.iter().map(|(status, count)| {
                Cell::from(Span::styled(count.to_string(), count_style(status, count)))
            }));
            Row::new(cells).style(theme::zebra_row_style(idx))
        })
        .collect();

    let widths = [
        Constraint::Min(8),
        Constraint::Length(7),
        Constraint::Length(10),
        Constraint::Length(7),
        Constraint::Length(8),
        Constraint::Length(6),
    ];
    let table = Table::new(rows, widths)
        .header(
            Row::new(vec!["Id", "Total", "Completed", "Failed", "Running", "Other"])
                .style(theme::HEADER_STYLE),
        )
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);

    f.render_stateful_widget(table, area, &mut app.id_table_state);
}

fn count_style(status: TaskStatus, count: u64) -> Style {
    if count == 0 {
        theme::MUTED
    } else {
        status_style(status)
    }
}

fn render_processes(f: &mut Frame, app: &mut App, area: Rect) {
    let title = match app.selection.id() {
        Some(id) => format!("{} for {id}", FocusPane::Processes.title()),
        None => FocusPane::Processes.title().to_string(),
    };
    let block = pane_block(app, FocusPane::Processes, title);

    if app.selection.id().is_none()
        || !app.processes_current()
        || app.snapshot.processes.is_empty()
    {
        let inner = block.inner(area);
        f.render_widget(block, area);
        let message = if app.selection.id().is_none() {
            "Select an id to list its processes"
        } else if !app.processes_current() {
            LOADING
        } else {
            "No processes for this id"
        };
        render_placeholder(f, inner, message);
        return;
    }

    let rows: Vec<Row> = app
        .snapshot
        .processes
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            Row::new(vec![
                Cell::from(row.process.clone()),
                Cell::from(row.task_id.clone()),
                Cell::from(Span::styled(
                    format!("{} {}", status_icon(row.status), row.raw_status),
                    status_style(row.status),
                )),
                Cell::from(row.ingested.format(TIMESTAMP_FORMAT).to_string()),
            ])
            .style(theme::zebra_row_style(idx))
        })
        .collect();

    let widths = [
        Constraint::Min(10),
        Constraint::Min(8),
        Constraint::Length(14),
        Constraint::Length(19),
    ];
    let table = Table::new(rows, widths)
        .header(Row::new(vec!["Process", "Task ID", "Status", "Ingested"]).style(theme::HEADER_STYLE))
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);

    f.render_stateful_widget(table, area, &mut app.process_table_state);
}

fn render_metadata(f: &mut Frame, app: &mut App, area: Rect) {
    let block = pane_block(app, FocusPane::Metadata, FocusPane::Metadata.title().to_string());
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(task_id) = app.selection.task_id() else {
        app.metadata_max_scroll = 0;
        render_placeholder(f, inner, "No selection");
        return;
    };
    if !app.metadata_current() {
        app.metadata_max_scroll = 0;
        render_placeholder(f, inner, LOADING);
        return;
    }

    let doc = match &app.snapshot.metadata {
        MetadataView::Loaded(doc) => doc,
        MetadataView::NotFound => {
            app.metadata_max_scroll = 0;
            render_placeholder(f, inner, "Task not found");
            return;
        }
        MetadataView::NoSelection => {
            app.metadata_max_scroll = 0;
            render_placeholder(f, inner, "No selection");
            return;
        }
    };

    let mut lines = Vec::new();
    if let Some(row) = app.snapshot.process(task_id) {
        lines.push(Line::from(vec![
            Span::styled("Process: ", Style::default().fg(Color::Blue)),
            Span::raw(row.process.clone()),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Task ID: ", Style::default().fg(Color::Blue)),
            Span::raw(row.task_id.clone()),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Blue)),
            Span::styled(row.raw_status.clone(), status_style(row.status)),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Ingested: ", Style::default().fg(Color::Blue)),
            Span::raw(row.ingested.format(TIMESTAMP_FORMAT).to_string()),
        ]));
        lines.push(Line::from(""));
    }

    if is_empty_document(doc) {
        lines.push(Line::from(Span::styled(
            "No process data available",
            theme::MUTED,
        )));
    } else {
        let pretty = serde_json::to_string_pretty(doc).unwrap_or_else(|_| doc.to_string());
        lines.extend(pretty.lines().map(|line| Line::from(line.to_string())));
    }

    let total_height = wrapped_height(&lines, inner.width);
    app.metadata_max_scroll = total_height.saturating_sub(inner.height);
    if app.metadata_scroll > app.metadata_max_scroll {
        app.metadata_scroll = app.metadata_max_scroll;
    }

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((app.metadata_scroll, 0));
    f.render_widget(p, inner);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let refreshed = match app.last_refresh {
        Some(at) => at.format("%H:%M:%S").to_string(),
        None => "never".to_string(),
    };
    let mut spans = vec![Span::raw(format!("Last refresh: {refreshed}"))];

    let path: Vec<&str> = [
        app.selection.run(),
        app.selection.id(),
        app.selection.task_id(),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !path.is_empty() {
        spans.push(Span::styled("  |  ", theme::MUTED));
        spans.push(Span::raw(path.join(" / ")));
    }
    if app.is_refreshing() {
        spans.push(Span::styled("  |  refreshing", theme::MUTED));
    }
    if let Some(error) = &app.last_error {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(error.clone(), theme::ERROR_STYLE));
    }
    spans.push(Span::styled("  ? help", theme::MUTED));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let inner_area = block.inner(area);
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let binding = |keys: &'static str, action: &'static str| {
        Line::from(vec![
            Span::styled(format!("{keys:<14}"), Color::Cyan),
            Span::raw(action),
        ])
    };
    let text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        binding("j / Down", "Next item in focused pane"),
        binding("k / Up", "Previous item in focused pane"),
        binding("Tab", "Focus next pane"),
        binding("Shift-Tab", "Focus previous pane"),
        binding("r", "Refresh now"),
        binding("?", "Toggle help"),
        binding("Esc", "Close help"),
        binding("q / Ctrl-C", "Quit"),
    ];

    let p = Paragraph::new(text).wrap(Wrap { trim: true });
    f.render_widget(p, inner_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn wrapped_height(lines: &[Line<'_>], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}
