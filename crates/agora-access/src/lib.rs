//! # Agora Access
//!
//! Answers "may requester R see entity E?" under the entity's audience
//! policy.
//!
//! - [`AccessEngine`] - `can_view`, plus read and write guards
//! - [`EntityStore`] - entity and selected-audience lookup, implemented for
//!   [`agora_store::Database`]
//! - [`evaluate`] - the pure audience predicate
//!
//! The creator always sees their own entity. Anything else depends on the
//! audience tag and on social-graph signals fetched per check.

#![doc(html_root_url = "https://docs.rs/agora-access/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod engine;
mod entity;
mod error;

pub use engine::{evaluate, AccessEngine, AudienceDecision, Signals};
pub use entity::{EntityRef, EntityStore};
pub use error::AccessError;
