//! # Agora Config
//!
//! Typed, layered configuration for the Agora gateway.
//!
//! - TOML and JSON files, merged over defaults or a preset
//! - Environment overrides of the form `AGORA__SECTION__KEY`
//! - Strict parsing: unknown fields are errors
//! - Cross-field validation before the server starts
//!
//! ## Example
//!
//! ```no_run
//! use agora_config::ConfigLoader;
//!
//! # fn main() -> Result<(), agora_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_production()
//!     .with_optional_file("agora.toml")?
//!     .with_dotenv()
//!     .with_env_prefix("AGORA")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! ## File format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 10000
//!
//! [rate_limit.ip_default]
//! capacity = 20
//! refill_per_second = 5.0
//!
//! [rate_limit.fail_mode]
//! ip = "open"
//! principal = "closed"
//!
//! [auth]
//! cookie_name = "jwt"
//!
//! [notifications.aggregation_windows]
//! new_message = 3600
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```

#![doc(html_root_url = "https://docs.rs/agora-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{AgoraConfig, MIN_SECRET_LEN};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    AuthConfig, BucketConfig, ConsumerConfig, DatabaseConfig, FailMode, FailModeConfig,
    LogFormat, LoggingConfig, MetricsConfig, NotificationsConfig, RateLimitConfig, ServerConfig,
    ServicesConfig, TelemetryConfig,
};
