//! Server error types.

use agora_config::ConfigError;
use agora_middleware::PipelineError;
use agora_store::StoreError;
use agora_telemetry::TelemetryError;
use thiserror::Error;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address did not parse or could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// Accepting or serving failed at the socket level.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The database could not be opened or migrated.
    #[error("database setup failed: {0}")]
    Store(#[from] StoreError),

    /// A route's pipeline could not be assembled.
    #[error("route setup failed: {0}")]
    Route(#[from] PipelineError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// A configured value is valid on its own but unusable here.
    #[error("invalid setting {field}: {reason}")]
    Setting {
        /// Dotted path of the setting.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ServerError {
    /// Creates a [`ServerError::Setting`].
    pub fn setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Setting {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        assert!(ServerError::Bind("port in use".into())
            .to_string()
            .contains("bind error"));
        assert_eq!(
            ServerError::setting("auth.secret", "too short").to_string(),
            "invalid setting auth.secret: too short"
        );
    }
}
