//! Layered configuration loading.

use crate::config::AgoraConfig;
use crate::error::ConfigError;
use crate::schema::{FailMode, LogFormat};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "AGORA";

/// Configuration loader.
///
/// Later layers override earlier ones:
/// 1. defaults or a preset
/// 2. a TOML or JSON file or string
/// 3. environment variables `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```
/// use agora_config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_development()
///     .with_string("[rate_limit.ip_default]\ncapacity = 5\nrefill_per_second = 1.0", "toml")
///     .unwrap()
///     .load()
///     .unwrap();
/// assert_eq!(config.rate_limit.ip_default.capacity, 5);
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: AgoraConfig,
    env_prefix: Option<String>,
    env_vars: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AgoraConfig::default(),
            env_prefix: None,
            env_vars: Vec::new(),
        }
    }

    /// Resets to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = AgoraConfig::default();
        self
    }

    /// Resets to the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = AgoraConfig::development();
        self
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = AgoraConfig::production();
        self
    }

    /// Loads a file, picking TOML or JSON by extension.
    ///
    /// Values in the file override the current ones; anything it leaves out
    /// is kept.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        tracing::debug!(path = %path.display(), "loading configuration file");
        self.with_string(&content, &format)
    }

    /// Loads a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration text in `format` (`toml` or `json`).
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => {
                let layer: toml::Value = toml::from_str(content)?;
                let mut base = toml::Value::try_from(&self.config)
                    .map_err(|e| ConfigError::invalid_value("<root>", e.to_string()))?;
                merge_toml(&mut base, layer);
                base.try_into()?
            }
            "json" => {
                let layer: serde_json::Value = serde_json::from_str(content)?;
                let mut base = serde_json::to_value(&self.config)?;
                merge_json(&mut base, layer);
                serde_json::from_value(base)?
            }
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        Ok(self)
    }

    /// Enables environment overrides under `prefix`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Adds explicit overrides, applied after the process environment.
    ///
    /// Keys use the same `PREFIX__SECTION__KEY` form; the prefix set with
    /// [`Self::with_env_prefix`] (or [`DEFAULT_ENV_PREFIX`]) is stripped.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Loads a `.env` file into the process environment, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable .env"),
        }
        self
    }

    /// Applies environment overrides and validates.
    pub fn load(self) -> Result<AgoraConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides without validating.
    pub fn load_unvalidated(mut self) -> Result<AgoraConfig, ConfigError> {
        let prefix = self
            .env_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_ENV_PREFIX.to_string());
        if self.env_prefix.is_some() {
            let process: Vec<(String, String)> = env::vars()
                .filter(|(key, _)| key.starts_with(&format!("{prefix}__")))
                .collect();
            for (key, value) in process {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        for (key, value) in std::mem::take(&mut self.env_vars) {
            self.apply_env_var(&key, &value, &prefix)?;
        }
        Ok(self.config)
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse(key, "invalid key format"))?;
        let parts: Vec<&str> = path.split("__").collect();
        let c = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => c.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => c.server.shutdown_timeout_secs = parse(key, value)?,
            ["SERVER", "REQUEST_TIMEOUT_MS"] => c.server.request_timeout_ms = parse(key, value)?,
            ["SERVER", "TRUST_FORWARDED_FOR"] => c.server.trust_forwarded_for = parse_bool(key, value)?,

            ["RATE_LIMIT", "IP_DEFAULT", "CAPACITY"] => {
                c.rate_limit.ip_default.capacity = parse(key, value)?;
            }
            ["RATE_LIMIT", "IP_DEFAULT", "REFILL_PER_SECOND"] => {
                c.rate_limit.ip_default.refill_per_second = parse(key, value)?;
            }
            ["RATE_LIMIT", "PRINCIPAL_DEFAULT", "CAPACITY"] => {
                c.rate_limit.principal_default.capacity = parse(key, value)?;
            }
            ["RATE_LIMIT", "PRINCIPAL_DEFAULT", "REFILL_PER_SECOND"] => {
                c.rate_limit.principal_default.refill_per_second = parse(key, value)?;
            }
            ["RATE_LIMIT", "FAIL_MODE", "IP"] => c.rate_limit.fail_mode.ip = parse_fail_mode(key, value)?,
            ["RATE_LIMIT", "FAIL_MODE", "PRINCIPAL"] => {
                c.rate_limit.fail_mode.principal = parse_fail_mode(key, value)?;
            }
            ["RATE_LIMIT", "SWEEP_INTERVAL_SECS"] => c.rate_limit.sweep_interval_secs = parse(key, value)?,

            ["AUTH", "SECRET"] => c.auth.secret = value.to_string(),
            ["AUTH", "LEEWAY_SECS"] => c.auth.leeway_secs = parse(key, value)?,
            ["AUTH", "COOKIE_NAME"] => c.auth.cookie_name = value.to_string(),
            ["AUTH", "TRACE_HEADER_NAME"] => c.auth.trace_header_name = value.to_lowercase(),
            ["AUTH", "REQUEST_HEADER_NAME"] => c.auth.request_header_name = value.to_lowercase(),

            ["NOTIFICATIONS", "EXPIRY_SECS"] => c.notifications.expiry_secs = parse(key, value)?,
            ["NOTIFICATIONS", "AGGREGATION_WINDOW_SECS"] => {
                c.notifications.aggregation_window_secs = parse(key, value)?;
            }
            ["NOTIFICATIONS", "AGGREGATION_WINDOWS", kind] => {
                c.notifications
                    .aggregation_windows
                    .insert(kind.to_lowercase(), parse(key, value)?);
            }
            ["NOTIFICATIONS", "PURGE_INTERVAL_SECS"] => {
                c.notifications.purge_interval_secs = parse(key, value)?;
            }
            ["NOTIFICATIONS", "CONSUMER", "BATCH_SIZE"] => {
                c.notifications.consumer.batch_size = parse(key, value)?;
            }
            ["NOTIFICATIONS", "CONSUMER", "POLL_INTERVAL_MS"] => {
                c.notifications.consumer.poll_interval_ms = parse(key, value)?;
            }
            ["NOTIFICATIONS", "CONSUMER", "MAX_ATTEMPTS"] => {
                c.notifications.consumer.max_attempts = parse(key, value)?;
            }
            ["NOTIFICATIONS", "CONSUMER", "BACKOFF_BASE_MS"] => {
                c.notifications.consumer.backoff_base_ms = parse(key, value)?;
            }

            ["DATABASE", "URL"] => c.database.url = value.to_string(),
            ["DATABASE", "MAX_CONNECTIONS"] => c.database.max_connections = parse(key, value)?,
            ["DATABASE", "ACQUIRE_TIMEOUT_MS"] => c.database.acquire_timeout_ms = parse(key, value)?,

            ["SERVICES", "USERS_URL"] => c.services.users_url = value.to_string(),
            ["SERVICES", "MEDIA_URL"] => c.services.media_url = value.to_string(),
            ["SERVICES", "TIMEOUT_MS"] => c.services.timeout_ms = parse(key, value)?,

            ["TELEMETRY", "SERVICE_NAME"] => c.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => c.telemetry.logging.enabled = parse_bool(key, value)?,
            ["TELEMETRY", "LOGGING", "LEVEL"] => c.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                c.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env_parse(key, "expected 'json' or 'pretty'")),
                };
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => c.telemetry.metrics.enabled = parse_bool(key, value)?,
            ["TELEMETRY", "METRICS", "ADDR"] => c.telemetry.metrics.addr = value.to_string(),

            _ => tracing::warn!(key, "ignoring unknown configuration override"),
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(key, format!("cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse(key, "expected boolean")),
    }
}

fn parse_fail_mode(key: &str, value: &str) -> Result<FailMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "open" => Ok(FailMode::Open),
        "closed" => Ok(FailMode::Closed),
        _ => Err(ConfigError::env_parse(key, "expected 'open' or 'closed'")),
    }
}

/// Overlays `layer` onto `base`, table by table.
fn merge_toml(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_toml(existing, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Overlays `layer` onto `base`, object by object.
fn merge_json(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_preset_loads() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn production_preset_requires_secret() {
        assert!(ConfigLoader::new().with_production().load().is_err());
        let config = ConfigLoader::new()
            .with_production()
            .with_env_vars([("AGORA__AUTH__SECRET", "a-long-enough-secret")])
            .load()
            .unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    }

    #[test]
    fn file_layer_keeps_unnamed_fields() {
        let config = ConfigLoader::new()
            .with_development()
            .with_string("[server]\nrequest_timeout_ms = 2500\n", "toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.request_timeout_ms, 2500);
        assert_eq!(config.server.http_addr, "127.0.0.1:8080");
        assert_eq!(config.auth.secret, "agora-development-secret");
    }

    #[test]
    fn json_layer_merges_too() {
        let config = ConfigLoader::new()
            .with_development()
            .with_string(r#"{"rate_limit": {"fail_mode": {"ip": "closed"}}}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.rate_limit.fail_mode.ip, FailMode::Closed);
        assert_eq!(config.rate_limit.fail_mode.principal, FailMode::Closed);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = ConfigLoader::new().with_string("[server]\nhttp_adr = \"x\"\n", "toml");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
        let result = ConfigLoader::new().with_string(r#"{"sever": {}}"#, "json");
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn unsupported_format_is_rejected() {
        assert!(matches!(
            ConfigLoader::new().with_string("", "yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn env_overrides_apply_last() {
        let config = ConfigLoader::new()
            .with_development()
            .with_string("[auth]\ncookie_name = \"session\"\n", "toml")
            .unwrap()
            .with_env_vars([
                ("AGORA__AUTH__COOKIE_NAME", "sid"),
                ("AGORA__RATE_LIMIT__PRINCIPAL_DEFAULT__CAPACITY", "80"),
                ("AGORA__RATE_LIMIT__FAIL_MODE__PRINCIPAL", "open"),
                ("AGORA__NOTIFICATIONS__AGGREGATION_WINDOWS__NEW_MESSAGE", "3600"),
                ("AGORA__TELEMETRY__METRICS__ENABLED", "no"),
                ("AGORA__DATABASE__URL", "sqlite:///var/lib/agora/agora.db"),
                ("AGORA__SOMETHING__ELSE", "ignored"),
            ])
            .load()
            .unwrap();
        assert_eq!(config.auth.cookie_name, "sid");
        assert_eq!(config.rate_limit.principal_default.capacity, 80);
        assert_eq!(config.rate_limit.fail_mode.principal, FailMode::Open);
        assert_eq!(config.notifications.aggregation_windows["new_message"], 3600);
        assert!(!config.telemetry.metrics.enabled);
        assert_eq!(config.database.url, "sqlite:///var/lib/agora/agora.db");
    }

    #[test]
    fn bad_env_values_are_errors() {
        let result = ConfigLoader::new()
            .with_development()
            .with_env_vars([("AGORA__SERVER__REQUEST_TIMEOUT_MS", "soon")])
            .load();
        assert!(matches!(result, Err(ConfigError::EnvParse { .. })));

        let result = ConfigLoader::new()
            .with_development()
            .with_env_vars([("AGORA__RATE_LIMIT__FAIL_MODE__IP", "ajar")])
            .load();
        assert!(matches!(result, Err(ConfigError::EnvParse { .. })));
    }

    #[test]
    fn process_env_is_read_under_prefix() {
        env::set_var("AGORA_LOADER_TEST__DATABASE__MAX_CONNECTIONS", "3");
        let config = ConfigLoader::new()
            .with_development()
            .with_env_prefix("agora_loader_test")
            .load()
            .unwrap();
        env::remove_var("AGORA_LOADER_TEST__DATABASE__MAX_CONNECTIONS");
        assert_eq!(config.database.max_connections, 3);
    }
}
