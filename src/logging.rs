//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and to a file. When `RUSTY_RAG_LOG_FILE` is
//! set, logs are appended to that path; otherwise a file logger is created under
//! `logs/rusty-rag.log`. The file layer uses a non-blocking writer.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "rusty-rag.log";

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stdout layer and, when available, a file layer.
/// - Keeps the non-blocking writer guard alive for the process lifetime.
pub fn init_tracing() {
    init_with_stdout(true);
}

/// Configure tracing for interactive binaries: file logging only, so answers printed to the
/// terminal are not interleaved with log lines.
pub fn init_file_tracing() {
    init_with_stdout(false);
}

fn init_with_stdout(stdout: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = stdout.then(|| fmt::layer().with_target(false).compact());
    let file_layer = configure_file_writer().map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    if let Ok(path) = std::env::var("RUSTY_RAG_LOG_FILE") {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        }
    } else {
        if let Err(err) = std::fs::create_dir_all(LOG_DIR) {
            eprintln!("Failed to create logs directory: {err}");
            return None;
        }
        let file_appender = tracing_appender::rolling::never(LOG_DIR, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(non_blocking)
    }
}
