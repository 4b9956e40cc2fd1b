//! Hydration errors.

use agora_core::{AgoraError, RpcStatus};
use thiserror::Error;

/// A batch lookup failed and the page was discarded.
#[derive(Debug, Error)]
pub enum HydrateError {
    /// The user directory batch failed.
    #[error("user batch failed: {0}")]
    Users(RpcStatus),

    /// The media batch failed.
    #[error("image batch failed: {0}")]
    Media(RpcStatus),
}

impl HydrateError {
    /// Returns the underlying transport status.
    #[must_use]
    pub const fn status(&self) -> &RpcStatus {
        match self {
            Self::Users(status) | Self::Media(status) => status,
        }
    }
}

impl From<HydrateError> for AgoraError {
    fn from(err: HydrateError) -> Self {
        match err {
            HydrateError::Users(status) | HydrateError::Media(status) => status.into(),
        }
    }
}
