use metalog_core::TaskStatus;
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const FOCUSED_BORDER: Style = Style::new().fg(Color::Cyan);
pub const MUTED: Style = Style::new().fg(Color::DarkGray);
pub const ERROR_STYLE: Style = Style::new()
    .fg(Color::Rgb(251, 73, 52))
    .add_modifier(Modifier::BOLD);

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub mod icons {
    pub const COMPLETED: &str = "x";
    pub const FAILED: &str = "!";
    pub const RUNNING: &str = ">";
    pub const OTHER: &str = ".";
}

pub fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => icons::COMPLETED,
        TaskStatus::Failed => icons::FAILED,
        TaskStatus::Running => icons::RUNNING,
        TaskStatus::Other => icons::OTHER,
    }
}

/// completed green, failed red, running yellow, anything else the terminal default.
pub fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => Color::Rgb(184, 187, 38),
        TaskStatus::Failed => Color::Rgb(251, 73, 52),
        TaskStatus::Running => Color::Rgb(250, 189, 47),
        TaskStatus::Other => Color::Reset,
    }
}

pub fn status_style(status: TaskStatus) -> Style {
    Style::new().fg(status_color(status))
}
