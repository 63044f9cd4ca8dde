mod transports;
mod ui;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ctrlview_core::client::ControllerClient;
use ctrlview_core::config::{ClientConfig, ConfigError};
use ctrlview_core::history::ReleaseHistory;
use ctrlview_core::request::{Modifier, StreamDeploymentsRequest, set_name_filters};

use transports::{FakeController, spawn_activity};
use ui::timeline::{self, StatusInfo, TimelineView};

/// Longest wait between frames
const FRAME: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "ctrlview")]
#[command(about = "Watch an app's release history as it streams in", long_about = None)]
struct Cli {
    /// Config file (discovered from the current directory when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter such as `debug` or `ctrlview_core=trace` (falls back to RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Append logs to this file. Logs are discarded otherwise.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the release history timeline of an app (default)
    Timeline {
        #[arg(short, long, default_value = "demo")]
        app: String,
        /// Interval between simulated controller writes
        #[arg(long, default_value_t = 1500)]
        rate_ms: u64,
        /// Days of history seeded before streaming starts
        #[arg(long, default_value_t = 5)]
        days: i64,
    },
    /// Print the resolved configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: Option<&str>, log_file: Option<&Path>) -> io::Result<()> {
    let filter = level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    // the terminal belongs to the UI, so logs never go to stdout/stderr
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .compact()
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .with_writer(io::sink)
                .try_init();
        }
    }
    Ok(())
}

/// Local demo settings: heights are terminal lines
fn demo_config() -> ClientConfig {
    let mut config = ClientConfig::new("fake://local");
    config.window.default_item_height = 3.0;
    config.window.overscan = 4.0;
    config
}

fn resolve_config(path: Option<&Path>) -> Result<(Option<PathBuf>, ClientConfig), ConfigError> {
    if let Some(path) = path {
        return Ok((Some(path.to_path_buf()), ClientConfig::load(path)?));
    }
    let cwd = std::env::current_dir()?;
    match ClientConfig::discover(&cwd) {
        Ok((path, config)) => Ok((Some(path), config)),
        Err(ConfigError::NotFound { searched }) => {
            info!(searched = searched.len(), "no config file, using local demo settings");
            Ok((None, demo_config()))
        }
        Err(e) => Err(e),
    }
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    let (path, config) = match resolve_config(cli.config.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Config { json }) => print_config(path.as_deref(), &config, json),
        Some(Commands::Timeline { app, rate_ms, days }) => run_timeline(&config, &app, rate_ms, days),
        None => run_timeline(&config, "demo", 1500, 5),
    }
}

fn print_config(path: Option<&Path>, config: &ClientConfig, json: bool) -> io::Result<()> {
    if json {
        let text = serde_json::to_string_pretty(config).map_err(io::Error::other)?;
        println!("{}", text);
        return Ok(());
    }
    match path {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no config file found, using demo settings"),
    }
    println!("controller_host: {}", config.controller_host);
    println!("auth_key: {}", if config.auth_key.is_some() { "<set>" } else { "<none>" });
    println!("window:");
    println!("  default_item_height: {}", config.window.default_item_height);
    println!("  overscan: {}", config.window.overscan);
    println!("  scroll_debounce_ms: {}", config.window.scroll_debounce_ms);
    Ok(())
}

fn run_timeline(config: &ClientConfig, app_name: &str, rate_ms: u64, days: i64) -> io::Result<()> {
    let controller = FakeController::new();
    let app = controller.seed_app(app_name, days);
    info!(app = %app.name, host = %config.controller_host, "opening timeline");

    let client = ControllerClient::from_config(Arc::new(controller.clone()), config);
    let activity = spawn_activity(client.clone(), app.clone(), Duration::from_millis(rate_ms.max(50)));

    let deployment_filter: Vec<Modifier<StreamDeploymentsRequest>> = vec![set_name_filters([app.name.as_str()])];
    let mut history = client.watch_release_history(&app.name, &[], &deployment_filter, true, true);
    let mut view = TimelineView::new(config.window.renderer_options());

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, &mut history, &mut view, &client, &app.display_name);
    restore_terminal(terminal)?;

    view.dispose();
    history.dispose();
    activity.abort();
    client.shutdown();
    let leaked = controller.open_watchers();
    if leaked > 0 {
        warn!(leaked, "watchers still open after shutdown");
    }
    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    history: &mut ReleaseHistory,
    view: &mut TimelineView,
    client: &ControllerClient,
    title: &str,
) -> io::Result<()> {
    loop {
        history.poll();
        let state = history.state();
        let status = StatusInfo {
            app: title,
            open_streams: client.open_streams(),
            loading: state.loading,
            error: state.error.as_ref().map(ToString::to_string),
        };

        let now = Instant::now();
        terminal.draw(|f| timeline::render(f, view, history.items(), &status, now))?;

        // wake up for the trailing edge of a scroll burst
        let timeout = view
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).min(FRAME))
            .unwrap_or(FRAME);
        if !event::poll(timeout)? {
            continue;
        }

        let CEvent::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        match (code, modifiers) {
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => return Ok(()),
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => return Ok(()),
            _ => {}
        }
        if !view.host().is_listening() {
            continue;
        }

        let now = Instant::now();
        match code {
            KeyCode::Char('j') | KeyCode::Down => view.scroll_by(1.0, now),
            KeyCode::Char('k') | KeyCode::Up => view.scroll_by(-1.0, now),
            KeyCode::PageDown | KeyCode::Char(' ') => view.scroll_by(view.page(), now),
            KeyCode::PageUp => view.scroll_by(-view.page(), now),
            KeyCode::Char('g') | KeyCode::Home => view.scroll_to(0.0, now),
            KeyCode::Char('G') | KeyCode::End => view.scroll_to_end(now),
            _ => {}
        }
    }
}
