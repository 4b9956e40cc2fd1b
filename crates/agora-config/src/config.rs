//! The root configuration.

use crate::error::ConfigError;
use crate::schema::{
    AuthConfig, BucketConfig, DatabaseConfig, LogFormat, NotificationsConfig, RateLimitConfig,
    ServerConfig, ServicesConfig, TelemetryConfig,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Shortest accepted credential secret, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Gateway configuration.
///
/// # Example
///
/// ```
/// use agora_config::AgoraConfig;
///
/// let config = AgoraConfig::development();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.auth.cookie_name, "jwt");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AgoraConfig {
    /// HTTP server.
    pub server: ServerConfig,
    /// Rate limits.
    pub rate_limit: RateLimitConfig,
    /// Credentials and header names.
    pub auth: AuthConfig,
    /// Notifications.
    pub notifications: NotificationsConfig,
    /// Connection pool.
    pub database: DatabaseConfig,
    /// Downstream services.
    pub services: ServicesConfig,
    /// Logging and metrics.
    pub telemetry: TelemetryConfig,
}

impl AgoraConfig {
    /// Local-run preset: loopback bind, pretty debug logs, no metrics
    /// exporter and a throwaway credential secret.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.http_addr = "127.0.0.1:8080".to_string();
        config.server.shutdown_timeout_secs = 5;
        config.auth.secret = "agora-development-secret".to_string();
        config.auth.leeway_secs = 60;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.metrics.enabled = false;
        config.database.url = "sqlite::memory:".to_string();
        config
    }

    /// Production preset. The credential secret must still be supplied.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.level = "info".to_string();
        config
    }

    /// Checks cross-field constraints that the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        socket_addr("server.http_addr", &self.server.http_addr)?;
        if self.telemetry.metrics.enabled {
            socket_addr("telemetry.metrics.addr", &self.telemetry.metrics.addr)?;
        }

        bucket("rate_limit.ip_default", self.rate_limit.ip_default)?;
        bucket("rate_limit.principal_default", self.rate_limit.principal_default)?;
        positive("rate_limit.sweep_interval_secs", self.rate_limit.sweep_interval_secs)?;

        if self.auth.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid_value(
                "auth.secret",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        for (field, value) in [
            ("auth.cookie_name", &self.auth.cookie_name),
            ("auth.trace_header_name", &self.auth.trace_header_name),
            ("auth.request_header_name", &self.auth.request_header_name),
        ] {
            if value.is_empty() {
                return Err(ConfigError::invalid_value(field, "must not be empty"));
            }
        }

        let notifications = &self.notifications;
        positive("notifications.expiry_secs", notifications.expiry_secs)?;
        positive(
            "notifications.aggregation_window_secs",
            notifications.aggregation_window_secs,
        )?;
        for (kind, secs) in &notifications.aggregation_windows {
            positive(&format!("notifications.aggregation_windows.{kind}"), *secs)?;
        }
        positive("notifications.purge_interval_secs", notifications.purge_interval_secs)?;
        if notifications.consumer.batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "notifications.consumer.batch_size",
                "must be at least 1",
            ));
        }
        if notifications.consumer.max_attempts == 0 {
            return Err(ConfigError::invalid_value(
                "notifications.consumer.max_attempts",
                "must be at least 1",
            ));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigError::invalid_value(
                "database.url",
                format!("not a sqlite URL: {}", self.database.url),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "database.max_connections",
                "must be at least 1",
            ));
        }

        for (field, url) in [
            ("services.users_url", &self.services.users_url),
            ("services.media_url", &self.services.media_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid_value(field, format!("not an http(s) URL: {url}")));
            }
        }
        Ok(())
    }
}

fn socket_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {value}")))
}

fn bucket(field: &str, bucket: BucketConfig) -> Result<(), ConfigError> {
    if bucket.capacity == 0 {
        return Err(ConfigError::invalid_value(
            format!("{field}.capacity"),
            "must be at least 1",
        ));
    }
    if !(bucket.refill_per_second.is_finite() && bucket.refill_per_second > 0.0) {
        return Err(ConfigError::invalid_value(
            format!("{field}.refill_per_second"),
            "must be a positive number",
        ));
    }
    Ok(())
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid_value(field, "must be greater than zero"));
    }
    Ok(())
}
