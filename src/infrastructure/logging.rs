//! Logging system configuration and initialization
//!
//! - Console output (plain or JSON)
//! - Optional daily-rolling log file through `tracing-appender`
//! - `RUST_LOG` overrides the configured level
//! - Timestamps in a fixed UTC offset (the source wiki's timezone by default)

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use once_cell::sync::Lazy;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

/// Keeps the non-blocking file writers alive for the life of the process.
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Formats event timestamps in a fixed offset from UTC.
#[derive(Debug, Clone, Copy)]
struct OffsetTimeFormatter {
    offset: FixedOffset,
}

impl OffsetTimeFormatter {
    fn new(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl FormatTime for OffsetTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&self.offset);
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Log directory: the configured one, else `logs/` under the user data dir.
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genshin-data-sync")
            .join("logs")
    })
}

/// Environment filter: `RUST_LOG` when set, else the configured level with
/// noisy dependencies quieted unless the level is `trace`.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| directives_filter(config))
}

fn directives_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = EnvFilter::new(&config.level);
    if config.level.to_lowercase().contains("trace") {
        return filter;
    }

    let mut targets: Vec<_> = config.module_filters.iter().collect();
    targets.sort();
    for (target, level) in targets {
        // Malformed entries are skipped; the subscriber is not up yet to report them.
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    if let Ok(directive) = format!("genshin_data_sync={}", config.level).parse() {
        filter = filter.add_directive(directive);
    }
    filter
}

/// Initialize logging with the given configuration.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let timer = OffsetTimeFormatter::new(config.utc_offset_hours);
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console_output {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(timer)
            .with_target(false);
        if config.json_format {
            layers.push(console.json().boxed());
        } else {
            layers.push(console.boxed());
        }
    }

    let log_dir = get_log_directory(config);
    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {}: {e}", log_dir.display()))?;

        let file_appender = rolling::daily(&log_dir, &config.file_prefix);
        let (file_writer, file_guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(file_guard);

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_timer(timer)
            .with_ansi(false)
            .with_target(true);
        if config.json_format {
            layers.push(
                file_layer
                    .json()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
        } else {
            layers.push(file_layer.boxed());
        }
    }

    Registry::default()
        .with(build_env_filter(config))
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!(
        level = %config.level,
        json = config.json_format,
        file_output = config.file_output,
        log_dir = %log_dir.display(),
        "Logging system initialized"
    );
    Ok(())
}
