//! Translation from [`AgoraConfig`] to each component's settings.

use crate::error::ServerError;
use agora_config::{AgoraConfig, FailMode as ConfigFailMode, LogFormat};
use agora_middleware::{BucketSpec, FailMode, GatewaySettings};
use agora_notify::{ConsumerSettings, DispatchSettings, NotificationKind};
use agora_rpc::ClientSettings;
use agora_store::PoolConfig;
use agora_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use http::header::HeaderName;
use std::collections::HashMap;
use std::time::Duration;

/// Stage settings for every route.
pub fn gateway_settings(config: &AgoraConfig) -> Result<GatewaySettings, ServerError> {
    let rate = &config.rate_limit;
    Ok(GatewaySettings {
        cookie_name: config.auth.cookie_name.clone(),
        trace_header: header_name("auth.trace_header_name", &config.auth.trace_header_name)?,
        request_header: header_name("auth.request_header_name", &config.auth.request_header_name)?,
        trust_forwarded_for: config.server.trust_forwarded_for,
        request_timeout: Some(Duration::from_millis(config.server.request_timeout_ms)),
        ip_default: BucketSpec::new(rate.ip_default.capacity, rate.ip_default.refill_per_second),
        principal_default: BucketSpec::new(
            rate.principal_default.capacity,
            rate.principal_default.refill_per_second,
        ),
        ip_fail_mode: fail_mode(rate.fail_mode.ip),
        principal_fail_mode: fail_mode(rate.fail_mode.principal),
    })
}

const fn fail_mode(mode: ConfigFailMode) -> FailMode {
    match mode {
        ConfigFailMode::Open => FailMode::Open,
        ConfigFailMode::Closed => FailMode::Closed,
    }
}

fn header_name(field: &str, value: &str) -> Result<HeaderName, ServerError> {
    HeaderName::from_bytes(value.as_bytes())
        .map_err(|_| ServerError::setting(field, format!("not a valid header name: {value:?}")))
}

/// Expiry and aggregation windows. Per-kind window keys must name a
/// notification kind.
pub fn dispatch_settings(config: &AgoraConfig) -> Result<DispatchSettings, ServerError> {
    let notifications = &config.notifications;
    let mut windows = HashMap::new();
    for (key, secs) in &notifications.aggregation_windows {
        let kind: NotificationKind = key
            .parse()
            .map_err(|err| ServerError::setting(format!("notifications.aggregation_windows.{key}"), format!("{err}")))?;
        windows.insert(kind, seconds(&format!("notifications.aggregation_windows.{key}"), *secs)?);
    }
    Ok(DispatchSettings {
        expiry: seconds("notifications.expiry_secs", notifications.expiry_secs)?,
        default_window: seconds(
            "notifications.aggregation_window_secs",
            notifications.aggregation_window_secs,
        )?,
        windows,
    })
}

fn seconds(field: &str, secs: u64) -> Result<chrono::Duration, ServerError> {
    chrono::Duration::from_std(Duration::from_secs(secs))
        .map_err(|_| ServerError::setting(field, "duration out of range"))
}

/// Event-log polling.
#[must_use]
pub fn consumer_settings(config: &AgoraConfig) -> ConsumerSettings {
    let consumer = &config.notifications.consumer;
    ConsumerSettings {
        batch_size: consumer.batch_size,
        poll_interval: Duration::from_millis(consumer.poll_interval_ms),
        max_attempts: consumer.max_attempts,
        backoff_base: Duration::from_millis(consumer.backoff_base_ms),
        ..ConsumerSettings::default()
    }
}

/// Connection pool sizing.
#[must_use]
pub fn pool_config(config: &AgoraConfig) -> PoolConfig {
    PoolConfig {
        url: config.database.url.clone(),
        max_connections: u32::try_from(config.database.max_connections).unwrap_or(u32::MAX),
        acquire_timeout: Duration::from_millis(config.database.acquire_timeout_ms),
    }
}

/// Downstream client headers and timeout.
#[must_use]
pub fn client_settings(config: &AgoraConfig) -> ClientSettings {
    ClientSettings {
        timeout: Duration::from_millis(config.services.timeout_ms),
        trace_header: config.auth.trace_header_name.clone(),
        request_header: config.auth.request_header_name.clone(),
    }
}

/// Logging and metrics.
#[must_use]
pub fn telemetry_config(config: &AgoraConfig) -> TelemetryConfig {
    let logging = &config.telemetry.logging;
    let base = match logging.format {
        LogFormat::Json => LogConfig::production(),
        LogFormat::Pretty => LogConfig::development(),
    };
    TelemetryConfig {
        logging: LogConfig {
            enabled: logging.enabled,
            level: logging.level.clone(),
            ..base
        },
        metrics: MetricsConfig {
            enabled: config.telemetry.metrics.enabled,
            addr: config.telemetry.metrics.addr.clone(),
            ..MetricsConfig::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_settings_follow_config() {
        let mut config = AgoraConfig::development();
        config.rate_limit.fail_mode.ip = ConfigFailMode::Closed;
        config.auth.cookie_name = "session".into();
        config.server.request_timeout_ms = 1500;
        let settings = gateway_settings(&config).unwrap();
        assert_eq!(settings.ip_fail_mode, FailMode::Closed);
        assert_eq!(settings.principal_fail_mode, FailMode::Closed);
        assert_eq!(settings.cookie_name, "session");
        assert_eq!(settings.trace_header.as_str(), "x-trace-id");
        assert_eq!(settings.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(settings.ip_default.capacity, 20);
    }

    #[test]
    fn pool_follows_database_section() {
        let mut config = AgoraConfig::development();
        config.database.url = "sqlite://var/agora.db".into();
        config.database.acquire_timeout_ms = 250;
        let pool = pool_config(&config);
        assert_eq!(pool.url, "sqlite://var/agora.db");
        assert_eq!(pool.acquire_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_header_name_is_rejected() {
        let mut config = AgoraConfig::development();
        config.auth.trace_header_name = "x trace".into();
        assert!(matches!(
            gateway_settings(&config),
            Err(ServerError::Setting { field, .. }) if field == "auth.trace_header_name"
        ));
    }

    #[test]
    fn per_kind_windows_map_to_kinds() {
        let mut config = AgoraConfig::development();
        config
            .notifications
            .aggregation_windows
            .insert("new_message".into(), 3600);
        let settings = dispatch_settings(&config).unwrap();
        assert_eq!(settings.window_for(NotificationKind::NewMessage), chrono::Duration::hours(1));
        assert_eq!(settings.window_for(NotificationKind::PostLiked), chrono::Duration::hours(24));
        assert_eq!(settings.expiry, chrono::Duration::days(30));

        config
            .notifications
            .aggregation_windows
            .insert("poke".into(), 60);
        assert!(dispatch_settings(&config).is_err());
    }

    #[test]
    fn telemetry_follows_format() {
        let config = AgoraConfig::development();
        let telemetry = telemetry_config(&config);
        assert!(!telemetry.logging.json_format);
        assert_eq!(telemetry.logging.level, "debug");
        assert!(!telemetry.metrics.enabled);

        let mut config = AgoraConfig::production();
        config.auth.secret = "a-production-secret".into();
        assert!(telemetry_config(&config).logging.json_format);
    }
}
