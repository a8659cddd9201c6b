//! Structured logging setup.
//!
//! Logs go to stderr (stdout is reserved for the JSON event stream to the
//! desktop shell) and to rolling files under the app log directory.

use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths::get_log_dir;

/// Files kept by the daily rotation.
const MAX_LOG_FILES: usize = 5;

/// Install the tracing subscriber: a daily-rolling file layer under the
/// app log dir plus a compact stderr layer, filtered by `RUST_LOG`
/// (default `info`). Returns an error instead of panicking when a
/// subscriber is already set, e.g. under tests.
pub fn init() -> Result<(), String> {
    let log_dir = get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("voice")
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&log_dir)
        .map_err(|e| format!("log file appender: {e}"))?;

    let to_file = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);

    let to_console = fmt::layer().with_writer(std::io::stderr).compact();

    // The default filter quiets per-frame chatter from the websocket and
    // polling internals.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn,mio=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(to_console)
        .try_init()
        .map_err(|e| format!("subscriber install: {e}"))?;

    tracing::info!(log_dir = %log_dir.display(), "Logger ready");
    Ok(())
}
