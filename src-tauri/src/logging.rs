//! Tracing setup for the desktop shell.
//!
//! Logs go to stderr and to a daily-rolling file under
//! `~/.interview-overlay/logs/`. `INTERVIEW_OVERLAY_DEBUG_LOG=1` forces debug
//! output; otherwise `RUST_LOG` applies with an `info` default.

use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "INTERVIEW_OVERLAY_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "overlay.log";

/// Installs the global subscriber. Keep the guard alive for the life of the
/// process or buffered file output is lost.
pub fn init() -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_dir = overlay_core::log_dir().filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        return None;
    }
    guard
}
