mod refresh;
mod state;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use metalog_storage::MetalogStore;
use ratatui::{backend::CrosstermBackend, Terminal};
use refresh::{RefreshOutcome, RefreshWorker};
use state::{App, RefreshTrigger};
use std::{
    fs::OpenOptions,
    io,
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MIN_REFRESH_SECS: u64 = 1;
const MIN_QUERY_TIMEOUT_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(
    name = "metalog-ui",
    about = "Live drill-down dashboard over a metalog task database"
)]
struct Args {
    /// SQLite database holding the `metalog` table
    #[arg(value_name = "DB_PATH")]
    db_path: PathBuf,
    /// Seconds between automatic refreshes
    #[arg(long, default_value_t = 5)]
    refresh_secs: u64,
    /// Upper bound for one refresh pass, in milliseconds
    #[arg(long, default_value_t = 2000)]
    query_timeout_ms: u64,
}

#[derive(Debug, Clone)]
struct Config {
    db_path: PathBuf,
    refresh_interval: Duration,
    query_timeout: Duration,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            db_path: args.db_path,
            refresh_interval: Duration::from_secs(args.refresh_secs.max(MIN_REFRESH_SECS)),
            query_timeout: Duration::from_millis(args.query_timeout_ms.max(MIN_QUERY_TIMEOUT_MS)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from(Args::parse());
    init_logging();

    let store = match MetalogStore::open(&config.db_path)
        .with_context(|| format!("cannot open {}", config.db_path.display()))
    {
        Ok(store) => store,
        Err(err) => {
            error!(error = %format!("{err:#}"), "startup failed");
            eprintln!("metalog-ui: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        db = %config.db_path.display(),
        refresh_secs = config.refresh_interval.as_secs(),
        query_timeout_ms = config.query_timeout.as_millis() as u64,
        "metalog store opened"
    );

    match run(config, store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("metalog-ui: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, store: MetalogStore) -> Result<()> {
    let mut worker = RefreshWorker::spawn(store, config.query_timeout);
    let mut app = App::new(config.db_path.display().to_string());

    let result = match setup_terminal() {
        Ok(mut terminal) => {
            let result = run_app(&mut terminal, &mut app, &mut worker, &config).await;
            let restored = restore_terminal(&mut terminal);
            result.and(restored)
        }
        Err(err) => {
            let _ = disable_raw_mode();
            Err(err)
        }
    };

    worker.shutdown(config.query_timeout * 2).await;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    worker: &mut RefreshWorker,
    config: &Config,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut ticker = interval_at(
        Instant::now() + config.refresh_interval,
        config.refresh_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if let Some(request) = app.take_refresh_request() {
            let epoch = request.epoch;
            if let Err(err) = worker.request(request) {
                app.apply_refresh(RefreshOutcome {
                    epoch,
                    result: Err(err),
                });
            }
        }
        if app.take_timer_reset() {
            ticker.reset();
        }

        terminal.draw(|f| ui::render(f, app))?;

        tokio::select! {
            _ = ticker.tick() => {
                app.request_refresh(RefreshTrigger::Timer);
            }
            Some(outcome) = worker.next_outcome() => {
                app.apply_refresh(outcome);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key)))
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) =>
                    {
                        app.handle_key(key);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err).context("read terminal event"),
                    None => break,
                }
            }
        }

        if app.should_quit() {
            info!("quit requested");
            break;
        }
    }

    Ok(())
}

/// Stdout belongs to the dashboard, so logs go to `METALOG_LOG_FILE` or nowhere.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_file = std::env::var("METALOG_LOG_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.trim())
                .ok()
        });

    match log_file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::from(Args::parse_from(["metalog-ui", "runs.db"]));
        assert_eq!(config.db_path, PathBuf::from("runs.db"));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.query_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn intervals_are_clamped_to_their_minimum() {
        let config = Config::from(Args::parse_from([
            "metalog-ui",
            "runs.db",
            "--refresh-secs",
            "0",
            "--query-timeout-ms",
            "5",
        ]));
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.query_timeout, Duration::from_millis(100));
    }

    #[test]
    fn db_path_is_required() {
        assert!(Args::try_parse_from(["metalog-ui"]).is_err());
    }
}
