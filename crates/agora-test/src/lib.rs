//! # Agora Test
//!
//! Test utilities shared by the Agora crates.
//!
//! - [`FakeSocialGraph`], [`FakeUserDirectory`], [`FakeMedia`] - in-memory
//!   downstream services that record calls and fail on demand
//! - [`TestRequest`] / [`TestClient`] / [`TestResponse`] - drive a request
//!   dispatcher without a socket
//!
//! ## Example
//!
//! ```ignore
//! use agora_core::RpcStatus;
//! use agora_test::FakeSocialGraph;
//!
//! let graph = FakeSocialGraph::new().with_follow(11, 7);
//! graph.fail_with(RpcStatus::unavailable("graph", "connection refused"));
//! ```

#![doc(html_root_url = "https://docs.rs/agora-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod fakes;
mod request;
mod response;

pub use client::{TestClient, TestHandler};
pub use error::TestError;
pub use fakes::{FakeMedia, FakeSocialGraph, FakeUserDirectory, GraphCall};
pub use request::{TestRequest, TestRequestBuilder};
pub use response::TestResponse;
