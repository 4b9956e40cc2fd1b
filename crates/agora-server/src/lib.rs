//! # Agora Server
//!
//! The HTTP gateway binary and its assembly.
//!
//! - [`Gateway`] - wires config, store, access engine, hydrator, the outbox
//!   event log and the notification consumer behind one [`Router`]
//! - [`Server`] - HTTP/1 accept loop with graceful drain
//! - [`Router`] - exact-path routing plus `/health`, `/ready` and `/metrics`
//! - [`handlers`] - post and notification endpoints
//! - [`ShutdownSignal`] - OS signal handling shared by every task
//!
//! ## Example
//!
//! ```no_run
//! use agora_config::AgoraConfig;
//! use agora_core::SystemClock;
//! use agora_server::{Gateway, Ports, ShutdownSignal};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), agora_server::ServerError> {
//! let config = AgoraConfig::development();
//! let gateway = Gateway::new(&config, Ports::http(&config)?, Arc::new(SystemClock)).await?;
//! gateway.run(ShutdownSignal::with_os_signals()).await
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/agora-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod error;
pub mod handlers;
mod health;
mod router;
mod server;
pub mod settings;
mod shutdown;
mod state;

pub use app::{routes, Gateway, Ports, MAX_EVENT_BACKLOG};
pub use error::ServerError;
pub use health::{HealthCheck, HealthStatus, ReadinessCheck, ReadinessStatus};
pub use router::{Router, HEALTH_PATH, METRICS_PATH, READY_PATH};
pub use server::{Server, MAX_BODY_BYTES};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
pub use state::AppState;
