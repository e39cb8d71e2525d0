//! seclearn - command-line front end for the learning platform's session.
//!
//! Signs in and out against the hosted backend, shows the current session
//! and profile, and can follow session changes live.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seclearn_core::auth::SessionStore;
use seclearn_core::{Config, HttpBackend, SessionSync};

use commands::Command;

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (writer, guard) = tracing_appender::non_blocking(io::stderr());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let mut config = Config::load();
    let mut backend = HttpBackend::new(&config)?;
    match config.cache_dir() {
        Ok(dir) => backend = backend.with_session_store(SessionStore::new(dir)),
        Err(e) => tracing::warn!(error = %e, "No cache directory, session will not persist"),
    }
    let backend = Arc::new(backend);

    info!(?command, "seclearn starting");
    let sync = SessionSync::start(backend.clone(), backend, &config);

    let result = commands::run(command, &sync, &mut config).await;

    sync.shutdown().await;
    result
}
