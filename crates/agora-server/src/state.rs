//! Shared handler state.

use agora_access::AccessEngine;
use agora_core::Clock;
use agora_hydrate::Hydrator;
use agora_notify::Inbox;
use agora_store::Database;
use std::sync::Arc;

/// Services every gateway handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Relational store.
    pub db: Database,
    /// Audience checks.
    pub access: AccessEngine,
    /// User and image resolution.
    pub hydrator: Hydrator,
    /// Notification queries.
    pub inbox: Inbox,
    /// Time source for stored timestamps.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("db", &self.db)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
