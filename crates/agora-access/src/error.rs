//! Access-check errors.

use agora_core::{AgoraError, RpcStatus};
use agora_store::StoreError;
use thiserror::Error;

/// Why a decision could not be reached.
#[derive(Debug, Error)]
pub enum AccessError {
    /// A social-graph signal failed; the decision is indeterminate.
    #[error("access decision indeterminate: {0}")]
    Indeterminate(#[from] RpcStatus),

    /// The entity lookup failed.
    #[error("entity lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl From<AccessError> for AgoraError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Indeterminate(status) => status.into(),
            AccessError::Store(err) => err.into(),
        }
    }
}
