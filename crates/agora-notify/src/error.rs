//! Notification errors.

use agora_core::AgoraError;
use agora_store::StoreError;
use thiserror::Error;

/// Errors from decoding, dispatching or consuming notification events.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The payload is not a valid envelope.
    #[error("malformed event: {0}")]
    Decode(#[from] serde_json::Error),

    /// The envelope has no `type` tag.
    #[error("event has no type tag")]
    MissingType,

    /// The envelope's `type` tag names no known event.
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// Writing notifications failed.
    #[error("notification store error: {0}")]
    Store(#[from] StoreError),

    /// The event log could not be read or committed.
    #[error("event log error: {0}")]
    Log(String),
}

impl NotifyError {
    /// Returns `true` for failures worth retrying.
    ///
    /// Decode failures and unknown tags never become valid on redelivery.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Log(_) => true,
            Self::Decode(_) | Self::MissingType | Self::UnknownEvent(_) => false,
        }
    }
}

impl From<NotifyError> for AgoraError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Store(err) => err.into(),
            NotifyError::Decode(_) | NotifyError::MissingType | NotifyError::UnknownEvent(_) => {
                Self::bad_request(err.to_string())
            }
            NotifyError::Log(message) => Self::upstream_unavailable(message, Some("event-log")),
        }
    }
}
