// src/logging.rs

//! Logging setup with `tracing` + `tracing-subscriber`.
//!
//! Level resolution: `--log-level` flag, then the `QRUN_LOG` environment
//! variable, then `info`.

use anyhow::Result;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(lvl) => lvl.into(),
        None => std::env::var("QRUN_LOG")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(tracing::Level::INFO),
    };

    fmt().with_max_level(level).with_target(true).init();
    Ok(())
}

impl From<LogLevel> for tracing::Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
