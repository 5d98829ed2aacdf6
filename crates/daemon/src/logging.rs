//! Structured logging setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system based on configuration.
///
/// `RUST_LOG` wins over the configured level when set. When a log file is
/// configured, output goes there (without ANSI escapes) instead of stderr.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match log_file(config) {
        Some(file) => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            if config.json {
                let fmt_layer = fmt_layer.json();
                tracing_subscriber::registry().with(filter).with(fmt_layer).init();
            } else {
                tracing_subscriber::registry().with(filter).with(fmt_layer).init();
            }
        }
        None => {
            let fmt_layer = fmt::layer().with_target(true);
            if config.json {
                let fmt_layer = fmt_layer.json();
                tracing_subscriber::registry().with(filter).with(fmt_layer).init();
            } else {
                tracing_subscriber::registry().with(filter).with(fmt_layer).init();
            }
        }
    }
}

fn log_file(config: &LoggingConfig) -> Option<std::fs::File> {
    let path = config.file.as_ref()?;
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("cannot open log file {}: {err}", path.display());
            None
        }
    }
}
