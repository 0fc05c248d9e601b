//! Tracing subscriber setup: console output plus a daily-rotated log file.
//!
//! Both layers share one `EnvFilter` and one timestamp format in the
//! configured time zone.

use std::fs;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use netbackup_core::config::LogConfig;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Dependency crates capped below the configured level.
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("lapin", "info"),
    ("amq_protocol", "warn"),
    ("pinky_swear", "warn"),
    ("async_io", "warn"),
    ("polling", "warn"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "info"),
    ("rustls", "warn"),
    ("h2", "warn"),
];

/// Map a level name, including the `warning`/`critical` spellings, to a
/// filter directive.
pub fn level_directive(level: &str) -> anyhow::Result<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" | "fatal" => Ok("error"),
        "off" => Ok("off"),
        other => Err(anyhow!("unknown LOG_LEVEL {other:?}")),
    }
}

/// Base level plus the noisy-crate caps.
pub fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![level_directive(level)?.to_string()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{target}={lvl}"));
    }
    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str).map_err(|e| anyhow!("invalid log filter '{filter_str}': {e}"))
}

pub fn parse_timezone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow!("unknown LOG_TIMEZONE {name:?}: {e}"))
}

/// Wall-clock timestamps in a fixed IANA zone.
#[derive(Debug, Clone, Copy)]
pub struct ZonedTimer(pub Tz);

impl ZonedTimer {
    pub fn format_at(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.0).format(TIME_FORMAT).to_string()
    }
}

impl FormatTime for ZonedTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.format_at(Utc::now()))
    }
}

/// `{dir}/{prefix}.{YYYY-MM-DD}.log`, rotated at midnight, keeping
/// `retained_files()` files.
pub fn file_appender(config: &LogConfig) -> anyhow::Result<RollingFileAppender> {
    fs::create_dir_all(&config.dir)
        .with_context(|| format!("cannot create log directory {}", config.dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.file_prefix.as_str())
        .filename_suffix("log")
        .max_log_files(config.retained_files())
        .build(&config.dir)
        .with_context(|| format!("cannot open log file in {}", config.dir.display()))
}

/// Install the global subscriber. Call once, after env files are loaded.
///
/// `RUST_LOG` replaces the level-based filter when set. Keep the returned
/// guard alive for the life of the process; dropping it flushes the file.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<WorkerGuard> {
    let timer = ZonedTimer(parse_timezone(&config.timezone)?);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_env_filter(&config.level)?,
    };
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config)?);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(false)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(guard)
}
