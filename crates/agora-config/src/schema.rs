//! Configuration sections.
//!
//! Every section rejects unknown fields and fills missing ones from its
//! defaults, so a file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Bind address.
    pub http_addr: String,
    /// Grace period for in-flight requests on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Per-request deadline in milliseconds. Zero disables it.
    pub request_timeout_ms: u64,
    /// Take the client IP from `x-forwarded-for` / `x-real-ip`.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 30,
            request_timeout_ms: 10_000,
            trust_forwarded_for: false,
        }
    }
}

/// One token-bucket shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BucketConfig {
    /// Burst capacity.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

/// What a limiter stage does when the limiter itself fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Admit the request.
    Open,
    /// Reject the request.
    Closed,
}

/// Fail modes per limiter scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct FailModeConfig {
    /// Per-IP limiter.
    pub ip: FailMode,
    /// Per-principal limiter.
    pub principal: FailMode,
}

impl Default for FailModeConfig {
    fn default() -> Self {
        Self {
            ip: FailMode::Open,
            principal: FailMode::Closed,
        }
    }
}

/// Rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitConfig {
    /// Default bucket for per-IP limits.
    pub ip_default: BucketConfig,
    /// Default bucket for per-principal limits.
    pub principal_default: BucketConfig,
    /// Fail modes.
    pub fail_mode: FailModeConfig,
    /// How often idle buckets are evicted, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_default: BucketConfig {
                capacity: 20,
                refill_per_second: 5.0,
            },
            principal_default: BucketConfig {
                capacity: 40,
                refill_per_second: 20.0,
            },
            fail_mode: FailModeConfig::default(),
            sweep_interval_secs: 60,
        }
    }
}

/// Credential and header conventions.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct AuthConfig {
    /// HS256 signing secret. At least 16 bytes.
    pub secret: String,
    /// Clock skew tolerated on expiry, in seconds.
    pub leeway_secs: u64,
    /// Cookie carrying the credential.
    pub cookie_name: String,
    /// Header carrying the trace ID.
    pub trace_header_name: String,
    /// Header carrying the request ID.
    pub request_header_name: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("leeway_secs", &self.leeway_secs)
            .field("cookie_name", &self.cookie_name)
            .field("trace_header_name", &self.trace_header_name)
            .field("request_header_name", &self.request_header_name)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            leeway_secs: 0,
            cookie_name: "jwt".to_string(),
            trace_header_name: "x-trace-id".to_string(),
            request_header_name: "x-request-id".to_string(),
        }
    }
}

/// Event-log consumer settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ConsumerConfig {
    /// Records per poll.
    pub batch_size: usize,
    /// Sleep when the log is drained, in milliseconds.
    pub poll_interval_ms: u64,
    /// Attempts per event before leaving it for redelivery.
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 250,
            max_attempts: 5,
            backoff_base_ms: 100,
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct NotificationsConfig {
    /// Lifetime of a notification, in seconds.
    pub expiry_secs: u64,
    /// Default aggregation window, in seconds.
    pub aggregation_window_secs: u64,
    /// Per-type aggregation windows in seconds, keyed by type tag.
    pub aggregation_windows: BTreeMap<String, u64>,
    /// How often expired rows are purged, in seconds.
    pub purge_interval_secs: u64,
    /// Consumer settings.
    pub consumer: ConsumerConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 30 * 24 * 60 * 60,
            aggregation_window_secs: 24 * 60 * 60,
            aggregation_windows: BTreeMap::new(),
            purge_interval_secs: 60 * 60,
            consumer: ConsumerConfig::default(),
        }
    }
}

/// Database location and pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    /// SQLite URL: `sqlite://path/to/file.db` or `sqlite::memory:`.
    pub url: String,
    /// Pool size.
    pub max_connections: usize,
    /// Wait for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://agora.db".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Downstream service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ServicesConfig {
    /// Users service (social graph and directory).
    pub users_url: String,
    /// Media service.
    pub media_url: String,
    /// Per-call timeout ceiling, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            users_url: "http://127.0.0.1:8081".to_string(),
            media_url: "http://127.0.0.1:8082".to_string(),
            timeout_ms: 2_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable text.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Install a subscriber at all.
    pub enabled: bool,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    pub enabled: bool,
    /// Exporter bind address.
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetryConfig {
    /// Service name attached to logs.
    pub service_name: String,
    /// Logging.
    pub logging: LoggingConfig,
    /// Metrics.
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "agora-gateway".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
