use std::path::Path;

use anyhow::{Context, Result};
use time::macros::format_description;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, util::SubscriberInitExt as _};

const LOG_FILE_PREFIX: &str = "catalog";

/// Installs the global subscriber, writing to a daily rolling `catalog.log` in `logs_dir`.
///
/// The filter honours `RUST_LOG` and defaults to `debug`. Keep the returned guard alive for
/// as long as logs should be flushed.
pub fn setup_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    let (subscriber, guard) = file_subscriber(logs_dir)?;
    // Also bridges `log` records through tracing-log
    subscriber.try_init().context("Failed to set global subscriber")?;
    Ok(guard)
}

fn file_subscriber(
    logs_dir: &Path,
) -> Result<(impl Subscriber + Send + Sync + 'static, WorkerGuard)> {
    fs_err::create_dir_all(logs_dir).context("Failed to create logs directory")?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(10)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(logs_dir)
        .context("Failed to initialize file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_timer(LocalTime::new(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        )))
        .with_writer(non_blocking)
        .finish();
    Ok((subscriber, guard))
}
