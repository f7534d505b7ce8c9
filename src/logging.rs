//! Structured logging and tracing for devgate
//!
//! Console, rolling file and an in-process broadcast feed (served as SSE by
//! the web API) are separate `tracing-subscriber` layers, each with its own
//! level filter. Components log through [`StructuredLogger`], which attaches
//! `component=…,device=…` fields to every event.

use crate::config::LoggingConfig;
use crate::error::{GatewayError, Result};
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod broadcast;
mod level;
mod state;
mod structured;

pub use broadcast::{BroadcastMakeWriter, subscribe_log_lines};
pub use level::{parse_line_level, parse_log_level, set_web_log_level_str, should_emit_to_web};
pub use state::{get_web_log_level, set_web_log_level};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

use level::min_level;
use state::{INIT_ERROR, INIT_ONCE, LOG_GUARD};

/// Environment variable that forces console-only logging
pub const DISABLE_FILE_LOG_ENV: &str = "DEVGATE_DISABLE_FILE_LOG";

/// Initialize logging system based on configuration
///
/// Only the first call installs the global subscriber; later calls return the
/// outcome of that first attempt.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(GatewayError::config(err.clone()));
    }
    Ok(())
}

fn install(config: &LoggingConfig) -> Result<()> {
    let base_level = parse_log_level(&config.level)?;
    let layer_level = |value: &Option<String>| {
        value
            .as_deref()
            .and_then(|s| parse_log_level(s).ok())
            .unwrap_or(base_level)
    };
    let console_level = layer_level(&config.console_level);
    let file_level = layer_level(&config.file_level);
    let web_level = layer_level(&config.web_level);

    // The global filter must let the most verbose layer through
    let most_verbose = min_level(min_level(console_level, file_level), web_level);
    let filter = build_env_filter(most_verbose);
    set_web_log_level(web_level);

    let broadcast_layer = {
        let base = fmt::layer()
            .with_writer(BroadcastMakeWriter::new())
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        // Capture everything; the SSE endpoint applies the runtime web level
        if config.json_format {
            base.json().with_filter(LevelFilter::TRACE).boxed()
        } else {
            base.with_filter(LevelFilter::TRACE).boxed()
        }
    };

    let console_layer = if config.console_output || should_use_console_only() {
        let base = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        Some(if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(console_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(console_level))
                .boxed()
        })
    } else {
        None
    };

    let file_layer = if should_use_console_only() {
        None
    } else {
        let file_appender = rolling::Builder::new()
            .rotation(rolling::Rotation::DAILY)
            .filename_prefix(log_file_prefix(&config.file))
            .filename_suffix("log")
            .max_log_files(config.backup_count.max(1) as usize)
            .build(log_directory(&config.file))
            .map_err(|e| GatewayError::io(format!("Failed to create log file appender: {}", e)))?;
        let (writer, guard) = non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        let base = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        Some(if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(file_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(file_level))
                .boxed()
        })
    };
    let has_file = file_layer.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(broadcast_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| GatewayError::config(format!("Logging already initialized: {}", e)))?;

    if has_file {
        info!(
            "Logging initialized - console_level: {:?}, file_level: {:?}, web_level: {:?}, file: {}",
            console_level, file_level, web_level, config.file
        );
    } else {
        info!(
            "Logging initialized - console_level: {:?}, web_level: {:?}, console-only",
            console_level, web_level
        );
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("devgate={},tokio_modbus=warn", level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os(DISABLE_FILE_LOG_ENV).is_some()
}

/// Directory holding the rotated files: the parent of a file path, or the path itself
pub fn log_directory(configured: &str) -> &Path {
    let p = Path::new(configured);
    if p.extension().is_some() {
        p.parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    } else {
        p
    }
}

/// File name prefix of the rotated files
pub fn log_file_prefix(configured: &str) -> String {
    let p = Path::new(configured);
    if p.extension().is_some() {
        p.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("devgate")
            .to_string()
    } else {
        "devgate".to_string()
    }
}
