use std::{fs::OpenOptions, path::PathBuf};

use chrono::Local;
use tracing_appender::non_blocking;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Holds the non-blocking writer guards; logging stops once this is
/// dropped, so `main` keeps it alive for the process lifetime.
pub struct TracingGuards {
    _file: tracing_appender::non_blocking::WorkerGuard,
    _stdout: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialises tracing with a daily-rotating file sink and a stdout sink.
/// The file sink is capped at `info` regardless of `RUST_LOG` so
/// exploratory debug logging doesn't bloat the audit trail.
pub fn init_tracing() -> TracingGuards {
    let (file_writer, file_guard) = daily_file_appender("logs", "engine");
    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse().unwrap());
    let file_filter = EnvFilter::new("info");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(false).with_writer(file_writer).with_filter(file_filter))
        .with(fmt::layer().with_writer(stdout_writer).with_ansi(true))
        .init();

    TracingGuards { _file: file_guard, _stdout: stdout_guard }
}

/// Produces `logs/engine.<YYYY-MM-DD>.log`, rotated daily by filename.
fn daily_file_appender(
    base_dir: &str,
    prefix: &str,
) -> (non_blocking::NonBlocking, tracing_appender::non_blocking::WorkerGuard) {
    let date = Local::now().format("%Y-%m-%d").to_string();
    let filename = format!("{prefix}.{date}.log");

    let mut path = PathBuf::from(base_dir);
    std::fs::create_dir_all(&path).ok();
    path.push(filename);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("failed to open log file");

    non_blocking(file)
}
