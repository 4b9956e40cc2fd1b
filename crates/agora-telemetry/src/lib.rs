//! # Agora Telemetry
//!
//! Logging and metrics shared by every Agora crate.
//!
//! - [`init_logging`] installs a JSON or pretty `tracing` subscriber
//! - [`init_metrics`] installs a Prometheus recorder, rendered by [`render_metrics`]
//! - `record_*` functions emit the gateway and worker metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use agora_telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::production())?;
//! ```

#![doc(html_root_url = "https://docs.rs/agora-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, LogConfig};
pub use metrics::{
    init_metrics, names, record_access_decision, record_auth_failure, record_notification,
    record_rate_limit, record_request, render_metrics, MetricsConfig,
};

/// Result type for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Combined logging and metrics configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Logging.
    pub logging: LogConfig,
    /// Metrics.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Pretty logs, metrics off.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            metrics: MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
        }
    }

    /// JSON logs, metrics on.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LogConfig::production(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Installs logging, then metrics.
///
/// # Errors
///
/// Returns the first initialization failure.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    tracing::debug!(
        json = config.logging.json_format,
        metrics = config.metrics.enabled,
        "telemetry initialized"
    );
    Ok(())
}
