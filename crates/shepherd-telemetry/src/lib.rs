//! Tracing/logging bootstrap for `shepherd-cli` (SPEC_FULL.md's ambient
//! observability section): an environment variable name the operator sets
//! the level in, defaulting to INFO when unset.
//!
//! This crate stays on plain `tracing-subscriber`/`tracing-appender` rather
//! than a full OpenTelemetry OTLP pipeline, since the workspace carries no
//! `opentelemetry*` dependency and there's no call here for a trace/metrics
//! exporter — only structured console or file logging.

use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the configured default log level {level:?} is not a valid filter directive"))]
    InvalidDefaultLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    SetGlobalDefault { source: tracing_subscriber::util::TryInitError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Log output format, named directly in SPEC_FULL.md's logging section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Text,
    /// One JSON object per line, for log aggregation in a cluster.
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the environment variable the operator sets filter directives
    /// in (e.g. `SHEPHERD_LOG`).
    pub env_var: String,
    /// The filter applied when `env_var` is unset or fails to parse.
    pub default_level: String,
    pub format: LogFormat,
    /// When set, logs are written to a daily-rotated file under this
    /// directory instead of stdout.
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            default_level: "info".to_string(),
            format: LogFormat::Text,
            log_dir: None,
        }
    }
}

/// Holds the non-blocking file appender's flush guard, if file logging is
/// enabled. The caller must keep this alive for the process's lifetime
/// (bind it in `main`, e.g. `let _guard = shepherd_telemetry::init(...)?;`) —
/// dropping it stops the background flush thread.
pub struct TracingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn build_filter(settings: &Settings) -> Result<EnvFilter> {
    match EnvFilter::try_from_env(&settings.env_var) {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.default_level).context(InvalidDefaultLevelSnafu {
            level: settings.default_level.clone(),
        }),
    }
}

/// Installs the global tracing subscriber. Call once, at process start.
pub fn init(settings: &Settings) -> Result<TracingGuard> {
    let filter = build_filter(settings)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (&settings.log_dir, settings.format) {
        (None, LogFormat::Text) => builder.try_init().context(SetGlobalDefaultSnafu)?,
        (None, LogFormat::Json) => builder.json().try_init().context(SetGlobalDefaultSnafu)?,
        (Some(dir), LogFormat::Text) => {
            let appender = tracing_appender::rolling::daily(dir, "shepherd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder.with_writer(writer).try_init().context(SetGlobalDefaultSnafu)?;
            return Ok(TracingGuard {
                _file_guard: Some(guard),
            });
        }
        (Some(dir), LogFormat::Json) => {
            let appender = tracing_appender::rolling::daily(dir, "shepherd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder
                .json()
                .with_writer(writer)
                .try_init()
                .context(SetGlobalDefaultSnafu)?;
            return Ok(TracingGuard {
                _file_guard: Some(guard),
            });
        }
    }

    Ok(TracingGuard { _file_guard: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_var_falls_back_to_the_default_level() {
        // SAFETY: this test owns the variable name and runs single-threaded
        // with respect to it; no other test touches this key.
        unsafe {
            std::env::remove_var("SHEPHERD_TEST_LOG_UNSET");
        }
        let settings = Settings::new("SHEPHERD_TEST_LOG_UNSET");
        let filter = build_filter(&settings).expect("default level parses");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn invalid_default_level_is_reported_as_an_error() {
        let mut settings = Settings::new("SHEPHERD_TEST_LOG_INVALID");
        settings.default_level = "not-a-level".to_string();
        assert!(build_filter(&settings).is_err());
    }
}
