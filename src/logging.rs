//! Tracing initialisation

use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

/// Keeps the non-blocking file writer flushing until process exit
#[cfg_attr(debug_assertions, allow(dead_code))]
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber. Calling it again is a no-op.
///
/// Debug builds log to stderr. Release builds write a daily rolling file
/// under `log_dir` when one is given, stderr otherwise.
#[allow(unused_variables)]
pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let level = resolve_log_level();

    #[cfg(not(debug_assertions))]
    if let Some(dir) = log_dir {
        use anyhow::Context;

        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let file_appender = tracing_appender::rolling::daily(dir, "offline_cache");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        // Already initialised: the first writer stays in place.
        if LOG_GUARD.set(guard).is_err() {
            return Ok(());
        }
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        tracing::info!("offline_cache v{} logging to {}", crate::VERSION, dir.display());
        return Ok(());
    }

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
    tracing::debug!("offline_cache v{} logging to stderr", crate::VERSION);
    Ok(())
}

/// Level from `RUST_LOG`; `info` when unset or unrecognised
pub fn resolve_log_level() -> LevelFilter {
    match std::env::var("RUST_LOG") {
        Ok(val) => parse_log_level(&val),
        Err(_) => LevelFilter::INFO,
    }
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}
