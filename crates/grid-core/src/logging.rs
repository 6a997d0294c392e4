//! Logging initialization using the `tracing` ecosystem.
//!
//! Provides:
//! - Console output (colored, human-readable)
//! - File output (daily rotation via `tracing-appender`, optionally JSON lines)
//! - Configurable log level via env var `RUST_LOG` or explicit parameter

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for the rolling log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    Text,
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start. After this, all `tracing::info!()`
/// etc. macros will produce output.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` env var is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: used as the log file prefix (e.g. `"grid-sync"`)
/// - `file_format`: plain text or one JSON object per line
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, file_format: FileFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(env_filter).with(console_layer).init();
        return;
    };

    let file_appender = tracing_appender::rolling::daily(dir, module_name);
    match file_format {
        FileFormat::Text => {
            let file_layer =
                fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();
        }
        FileFormat::Json => {
            let file_layer = fmt::layer().json().with_writer(file_appender).with_target(true).with_current_span(false);
            tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();
        }
    }
}
