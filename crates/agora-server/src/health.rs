//! Liveness and readiness.
//!
//! - `/health` answers 200 while the process is serving.
//! - `/ready` answers 200 only while every registered check passes and the
//!   server is not draining; otherwise 503.
//!
//! ```
//! use agora_server::{HealthCheck, ReadinessCheck};
//!
//! let health = HealthCheck::new("agora-gateway", "0.1.0");
//! assert_eq!(health.status().status(), "healthy");
//!
//! let readiness = ReadinessCheck::new().add_check("database", || true);
//! assert!(readiness.is_ready());
//! readiness.set_ready(false);
//! assert!(!readiness.is_ready());
//! ```

use agora_middleware::{Response, ResponseExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Body of `/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    status: String,
    service: String,
    version: String,
    uptime_seconds: u64,
}

impl HealthStatus {
    /// `"healthy"` while serving.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whole seconds since start.
    #[must_use]
    pub const fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }
}

/// Liveness probe.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    started: Instant,
}

impl HealthCheck {
    /// Starts the uptime clock.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            started: Instant::now(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Time since start.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Renders the `/health` response.
    #[must_use]
    pub fn response(&self) -> Response {
        Response::json(StatusCode::OK, &serde_json::json!(self.status()))
    }
}

/// Body of `/ready`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessStatus {
    ready: bool,
    checks: BTreeMap<String, bool>,
}

impl ReadinessStatus {
    /// Whether traffic should be sent here.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Result of one named check.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.get(name).copied()
    }
}

type CheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Readiness probe: named checks plus a switch flipped off while draining.
#[derive(Clone)]
pub struct ReadinessCheck {
    checks: Vec<(String, CheckFn)>,
    accepting: Arc<AtomicBool>,
}

impl std::fmt::Debug for ReadinessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCheck")
            .field("checks", &self.checks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish()
    }
}

impl ReadinessCheck {
    /// Ready, with no checks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Adds a named check.
    #[must_use]
    pub fn add_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checks.push((name.into(), Arc::new(check)));
        self
    }

    /// Flips the draining switch. Shared by every clone.
    pub fn set_ready(&self, ready: bool) {
        self.accepting.store(ready, Ordering::SeqCst);
    }

    /// Evaluates the checks.
    #[must_use]
    pub fn status(&self) -> ReadinessStatus {
        let checks: BTreeMap<String, bool> = self
            .checks
            .iter()
            .map(|(name, check)| (name.clone(), check()))
            .collect();
        let ready = self.accepting.load(Ordering::SeqCst) && checks.values().all(|ok| *ok);
        ReadinessStatus { ready, checks }
    }

    /// Shorthand for `status().is_ready()`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// Renders the `/ready` response.
    #[must_use]
    pub fn response(&self) -> Response {
        let status = self.status();
        let code = if status.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        Response::json(code, &serde_json::json!(status))
    }
}

impl Default for ReadinessCheck {
    fn default() -> Self {
        Self::new()
    }
}
