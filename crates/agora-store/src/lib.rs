//! # Agora Store
//!
//! Relational state for the Agora backend, kept in SQLite through `sqlx`.
//!
//! - [`Database`] - Connection pool plus a single writer permit; every wait honours the request deadline
//! - [`Transaction`] - One connection held for the whole unit of work; rolls back unless committed
//! - [`Connection`] - A pooled connection for reads
//!
//! The schema lives in `migrations/` and is applied by [`Database::connect`].
//! Multi-statement writes go through [`Database::run_tx`] (or an explicit
//! [`Database::begin`] / [`Transaction::commit`] pair).
//!
//! The `event_log` table is a transactional outbox: a handler appends the
//! event in the same transaction as the state change, and the notification
//! consumer drains it.

#![doc(html_root_url = "https://docs.rs/agora-store/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod model;
mod pool;
mod queries;
mod tx;

pub use error::StoreError;
pub use model::{AudienceTag, NewNotification, NewPost, Notification, NotificationId, Post};
pub use pool::{Connection, Database, PoolConfig};
pub use queries::{FoldChange, Purged, StoredDeadLetter, StoredEvent};
pub use tx::Transaction;
