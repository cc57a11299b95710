//! `tracing-subscriber` setup.
//!
//! Two output formats: pretty (human-readable, for local development)
//! and JSON (structured, for production — scraped by the platform's
//! log aggregator). Selected by [`LogConfig::with_format`]; `main.rs`
//! picks JSON when `NODE_ENV=production`, pretty otherwise.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error::{TelemetryError, TelemetryResult};

/// Output format for emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, colored, multi-line.
    #[default]
    Pretty,
    /// Single-line JSON, one object per event.
    Json,
}

/// Where log output is written.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    /// Standard error (default).
    #[default]
    Stderr,
    /// A rolling file under the given directory.
    File(PathBuf),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    format: LogFormat,
    target: LogTarget,
    extra_directives: Vec<String>,
}

impl LogConfig {
    /// Start a config at the given base level (`"info"`, `"debug"`, …).
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self { level: level.into(), format: LogFormat::default(), target: LogTarget::default(), extra_directives: Vec::new() }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Add an extra per-module filter directive, e.g.
    /// `"relay_gateway::router=trace"`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;
        for directive in &self.extra_directives {
            let parsed = directive.parse().map_err(|_| TelemetryError::InvalidFilter(directive.clone()))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global `tracing` subscriber from `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if the level or a
/// directive fails to parse, or [`TelemetryError::AlreadyInitialized`]
/// if a global subscriber is already set (e.g. a second call in the
/// same process, common in tests — callers should guard with
/// `std::sync::Once` or similar).
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;

    let result = match (&config.format, &config.target) {
        (LogFormat::Pretty, LogTarget::Stderr) => {
            tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).try_init()
        },
        (LogFormat::Json, LogTarget::Stderr) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Pretty, LogTarget::File(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "relay-gateway.log");
            tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(appender)).try_init()
        },
        (LogFormat::Json, LogTarget::File(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "relay-gateway.log");
            tracing_subscriber::registry().with(filter).with(fmt::layer().json().with_writer(appender)).try_init()
        },
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install logging with the conventional default: `info` level,
/// pretty format in development, JSON in anything else.
///
/// # Errors
///
/// See [`setup_logging`].
pub fn setup_default_logging(environment: &str) -> TelemetryResult<()> {
    let format = if environment.eq_ignore_ascii_case("development") { LogFormat::Pretty } else { LogFormat::Json };
    setup_logging(&LogConfig::new("info").with_format(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_garbage_directive() {
        let config = LogConfig::new("info").with_directive("not a valid directive ###");
        assert!(config.filter().is_err());
    }

    #[test]
    fn filter_accepts_valid_level_and_directive() {
        let config = LogConfig::new("info").with_directive("relay_gateway=debug");
        assert!(config.filter().is_ok());
    }
}
