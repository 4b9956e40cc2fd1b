//! Structured logging.
//!
//! Logs go through `tracing`; [`init_logging`] installs a `fmt` subscriber
//! that writes either JSON (production) or pretty text (development), with
//! the level taken from `RUST_LOG` when set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agora_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(user_id = 7, "request authenticated");
//! ```

use crate::error::TelemetryError;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is installed at all.
    pub enabled: bool,
    /// Default filter directive, used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of pretty text.
    pub json_format: bool,
    /// Log span close events with their duration.
    pub span_events: bool,
    /// Include file and line numbers.
    pub file_line_info: bool,
    /// Include the module target.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Pretty, verbose output for local runs.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug,hyper=info,reqwest=info".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// JSON output at info.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Sets the default filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::LoggingInit`] if a global subscriber is already
/// installed.
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level);
    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.include_target)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_span_events(span_events);

    let layer = if config.json_format {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Builds a filter from `RUST_LOG`, falling back to `default_level`.
#[must_use]
pub fn create_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Field names shared by every crate's log events.
pub mod fields {
    /// Request ID.
    pub const REQUEST_ID: &str = "request_id";
    /// Trace ID propagated across services.
    pub const TRACE_ID: &str = "trace_id";
    /// Authenticated user ID.
    pub const USER_ID: &str = "user_id";
    /// HTTP method.
    pub const HTTP_METHOD: &str = "http.method";
    /// Route pattern.
    pub const HTTP_ROUTE: &str = "http.route";
    /// Response status code.
    pub const HTTP_STATUS: &str = "http.status_code";
    /// Duration in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Error message.
    pub const ERROR: &str = "error";
}

/// Logs the completion of a request.
#[macro_export]
macro_rules! log_request_complete {
    ($request_id:expr, $route:expr, $status:expr, $duration_ms:expr) => {
        tracing::info!(
            request_id = %$request_id,
            http.route = %$route,
            http.status_code = $status,
            duration_ms = $duration_ms,
            "request completed"
        )
    };
}

/// Logs a request that ended in a server error.
#[macro_export]
macro_rules! log_request_error {
    ($request_id:expr, $route:expr, $error:expr) => {
        tracing::error!(
            request_id = %$request_id,
            http.route = %$route,
            error = %$error,
            "request failed"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_is_pretty_and_verbose() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.level.starts_with("debug"));
        assert!(config.file_line_info);
    }

    #[test]
    fn production_is_json() {
        let config = LogConfig::production();
        assert!(config.json_format);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn disabled_logging_is_a_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn bad_directive_falls_back() {
        let _ = create_env_filter("not a [valid directive");
    }
}
