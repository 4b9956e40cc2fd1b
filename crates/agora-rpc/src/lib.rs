//! # Agora RPC
//!
//! Ports for the downstream services the backend depends on, plus
//! JSON-over-HTTP clients implementing them.
//!
//! - [`SocialGraph`] - Follow and group-membership signals
//! - [`UserDirectory`] - Batch user profile lookup
//! - [`MediaService`] - Batch image URL lookup
//!
//! Clients propagate the trace ID and request ID headers and run every call
//! under the request deadline. Failures come back as
//! [`RpcStatus`](agora_core::RpcStatus) for the caller to classify.

#![doc(html_root_url = "https://docs.rs/agora-rpc/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod ports;

pub use client::{
    code_for_status, ClientSettings, HttpMediaService, HttpSocialGraph, HttpUserDirectory,
};
pub use ports::{ImageBatch, MediaService, SocialGraph, UserDirectory, UserRecord};
