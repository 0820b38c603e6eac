//! Tracing setup: a daily log file plus human-readable stderr output.
//!
//! `RUST_LOG` overrides the default filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "courierbid.log";
const DEFAULT_FILTER: &str = "info,courierbid=debug";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so `main` keeps
/// it alive for the whole run.
pub fn init() -> Result<WorkerGuard> {
    let log_dir = log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    // Files get full call-site detail; the terminal stays short.
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::debug!("Writing logs to {}", log_dir.join(LOG_FILE_PREFIX).display());
    Ok(guard)
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "courierbid", "courierbid")
        .context("Could not determine a data directory for logs")?;
    Ok(dirs.data_dir().join("logs"))
}

/// Console-only subscriber for tests. Safe to call from every test.
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_under_project_data_dir() {
        // No home directory in some sandboxes; only check the shape when there is one.
        if let Ok(dir) = log_dir() {
            assert!(dir.ends_with("logs"));
        }
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::debug!("still logging");
    }
}
