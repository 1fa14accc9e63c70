use std::path::PathBuf;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Target of the structured session events (state transitions, reconnects).
pub const SESSION_TARGET: &str = "session";

pub const LOG_FILE: &str = "channel_orion.log";
pub const EVENT_FILE: &str = "session_events.log";

/// Keeps the non-blocking file writers flushing. Hold it for the lifetime
/// of the process.
#[must_use]
pub struct LogGuards(Vec<WorkerGuard>);

/// Install the global subscriber.
///
/// - `log_level` is an `EnvFilter` directive (e.g. `"info"` or
///   `"channel_orion=debug,orion_client=info"`); `RUST_LOG` wins when set.
/// - Everything goes to stderr. With a `log_dir` there is also a daily
///   rolling text log and a JSON log of the `session` events only.
pub fn init_tracing(log_dir: Option<PathBuf>, log_level: &str) -> Result<LogGuards> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let mut guards = Vec::new();
    let (txt_layer, json_layer) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let (txt_writer, txt_guard) =
                tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE));
            let (json_writer, json_guard) =
                tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, &dir, EVENT_FILE));
            guards.push(txt_guard);
            guards.push(json_guard);

            let txt_layer = fmt::layer().with_writer(txt_writer).with_ansi(false);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_writer)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{SESSION_TARGET}=info")));
            (Some(txt_layer), Some(json_layer))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()?;

    Ok(LogGuards(guards))
}
