//! # Agora Notify
//!
//! Turns social events into stored notifications.
//!
//! - [`NotificationEvent`] / [`EventEnvelope`] - the tagged events and their
//!   JSON wire form
//! - [`builders`] - one named builder per event variant
//! - [`fold_or_insert`] - folds repeated events into one aggregated row
//! - [`NotificationDispatcher`] - builds, folds and stores an event's
//!   notifications in one transaction, idempotently per (event, recipient)
//! - [`Consumer`] - drives the dispatcher from an [`EventLog`], keeping each
//!   recipient's events in log order
//! - [`StoreEventLog`] - the durable outbox-backed log
//! - [`Inbox`] - listing, seen/acted marks and expiry purge
//!
//! ## Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use agora_core::SystemClock;
//! use agora_notify::{
//!     DispatchSettings, EventEnvelope, NotificationDispatcher, NotificationEvent, PostLiked,
//! };
//! use agora_store::{Database, PoolConfig};
//! use std::sync::Arc;
//!
//! let db = Database::connect(PoolConfig::in_memory()).await.unwrap();
//! let dispatcher =
//!     NotificationDispatcher::new(db.clone(), Arc::new(SystemClock), DispatchSettings::default());
//! let like = |liker_id| {
//!     EventEnvelope::new(NotificationEvent::PostLiked(PostLiked {
//!         post_id: 77,
//!         owner_id: 7,
//!         liker_id,
//!         aggregate: true,
//!     }))
//! };
//!
//! dispatcher.handle(&like(3)).await.unwrap();
//! let report = dispatcher.handle(&like(4)).await.unwrap();
//! assert_eq!(report.folded, 1);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/agora-notify/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod aggregate;
pub mod builders;
mod consumer;
mod dispatcher;
mod error;
mod event;
mod inbox;
mod kind;

pub use aggregate::{fold_or_insert, FoldOutcome};
pub use builders::NotificationDraft;
pub use consumer::{
    BatchReport, Consumer, ConsumerSettings, DeadLetter, EventLog, InMemoryEventLog, LogRecord,
    StoreEventLog,
};
pub use dispatcher::{DispatchReport, DispatchSettings, NotificationDispatcher};
pub use error::NotifyError;
pub use event::{
    EventEnvelope, FollowRequestCreated, GroupInvite, GroupJoinRequest, Mention, NewEventInGroup,
    NewFollower, NewMessage, NotificationEvent, PostCommented, PostLiked,
};
pub use inbox::{Inbox, MAX_PAGE};
pub use kind::{NotificationKind, UnknownKind};
