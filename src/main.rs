use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;

use quicksync::backend::{AuthApi, Backend, ChangeFeed, TaskApi};
use quicksync::config::Config;
use quicksync::session::SessionManager;
use quicksync::store::TaskListStore;
use quicksync::ui::Tui;
use quicksync::AppContext;

#[derive(Parser)]
#[command(
    name = "quicksync",
    about = "QuickSync List — terminal client for a hosted task list backend",
    version
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "QUICKSYNC_LOG")]
    log: Option<String>,

    /// Write logs to this file path (default: quicksync.log under the data directory)
    #[arg(long, env = "QUICKSYNC_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Data directory for the persisted session
    #[arg(long, env = "QUICKSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Required backend values are read here; a missing QUICKSYNC_URL or
    // QUICKSYNC_ANON_KEY aborts startup.
    let config = Arc::new(Config::new(args.log, args.log_file, args.data_dir)?);

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls. Logs go to a file;
    // the TUI owns the terminal.
    let _file_guard = setup_logging(&config);

    info!(
        url = %config.backend_url,
        version = env!("CARGO_PKG_VERSION"),
        "starting quicksync"
    );

    let backend = Arc::new(Backend::new(Arc::clone(&config))?);

    let session = Arc::new(SessionManager::new(
        backend.auth.clone() as Arc<dyn AuthApi>
    ));
    session
        .activate()
        .await
        .context("could not query the auth provider for the current identity")?;

    let store = Arc::new(TaskListStore::new(
        backend.data.clone() as Arc<dyn TaskApi>,
        backend.realtime.clone() as Arc<dyn ChangeFeed>,
    ));
    let store_task = tokio::spawn(Arc::clone(&store).run(session.identity()));

    let ctx = AppContext {
        config,
        backend,
        session: Arc::clone(&session),
        store,
    };
    let result = Tui::new(ctx).run().await;

    store_task.abort();
    session.shutdown();
    result
}

/// Initialize the tracing subscriber writing to a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// If the log directory cannot be created, logging is disabled with a
/// warning — never panics.
fn setup_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let path = config
        .log_file
        .clone()
        .unwrap_or_else(|| config.data_dir.join("quicksync.log"));
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let filename = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("quicksync.log"));

    // Ensure the directory exists before tracing-appender tries to open it.
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "warn: could not create log directory '{}': {e} — logging disabled",
            dir.display()
        );
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log))
        .with_writer(non_blocking)
        .with_ansi(false)
        .compact()
        .init();

    Some(guard)
}
