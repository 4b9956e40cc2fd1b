//! # Agora Core
//!
//! Shared types for the Agora social backend.
//!
//! This crate provides the foundational types every other Agora crate builds on:
//!
//! - [`RequestContext`] - Immutable per-request record (trace ID, request ID, client IP, caller, deadline)
//! - [`Principal`] / [`Caller`] - Authenticated identity attached by the gateway
//! - [`AgoraError`] - Stable error taxonomy exposed to clients as HTTP statuses
//! - [`classify`] - Translation of downstream transport failures into that taxonomy
//! - [`Clock`] - Wall-clock abstraction used by time-windowed logic

#![doc(html_root_url = "https://docs.rs/agora-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classify;
pub mod clock;
mod context;
mod error;
mod ids;
mod principal;

pub use classify::{classify, Classification, RpcCode, RpcStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RequestContext, RequestContextBuilder};
pub use error::{AgoraError, AgoraResult, ErrorKind};
pub use ids::{GroupId, ImageId, PostId, RequestId, TraceId, UserId};
pub use principal::{Caller, Principal};
