//! HTTP server.
//!
//! One task per connection, HTTP/1.1 via hyper. Request bodies are read in
//! full (up to [`MAX_BODY_BYTES`]) before dispatch. On shutdown the listener
//! stops accepting, readiness flips to 503, open connections finish their
//! in-flight request and the server waits up to the shutdown timeout for
//! them to close.

use crate::error::ServerError;
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use agora_core::AgoraError;
use agora_middleware::{Response, ResponseExt};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Serves a [`Router`] on a TCP listener.
#[derive(Debug, Clone)]
pub struct Server {
    router: Arc<Router>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Creates a server.
    #[must_use]
    pub fn new(router: Arc<Router>, shutdown_timeout: Duration) -> Self {
        Self {
            router,
            shutdown_timeout,
        }
    }

    /// Binds `addr`.
    pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address '{addr}': {e}")))?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("failed to bind {addr}: {e}")))
    }

    /// Accepts connections until `shutdown`, then drains.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, routes = ?self.router.paths(), "listening");
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let router = Arc::clone(&self.router);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(router, stream, peer, shutdown).await {
                                tracing::debug!(peer = %peer, error = %err, "connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "failed to accept connection"),
                },
                () = shutdown.recv() => break,
            }
        }

        self.router.readiness().set_ready(false);
        tracing::info!(
            addr = %local,
            active = tracker.active_connections(),
            timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
            "draining connections"
        );
        if tokio::time::timeout(self.shutdown_timeout, tracker.drained())
            .await
            .is_err()
        {
            tracing::warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections open"
            );
        }
        tracing::info!(addr = %local, "server stopped");
        Ok(())
    }
}

async fn handle_connection(
    router: Arc<Router>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(serve_request(&router, request, peer.ip()).await) }
    });
    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    }
}

async fn serve_request(router: &Router, request: hyper::Request<Incoming>, peer: IpAddr) -> Response {
    let (parts, body) = request.into_parts();
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            let request = http::Request::from_parts(parts, Full::new(collected.to_bytes()));
            router.dispatch(request, Some(peer)).await
        }
        Err(err) => {
            tracing::debug!(peer = %peer, error = %err, "failed to read request body");
            Response::from_error(&AgoraError::bad_request("request body unreadable or too large"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthCheck, ReadinessCheck};

    fn probes_only() -> Arc<Router> {
        Arc::new(Router::new(
            HealthCheck::new("agora-gateway", "test"),
            ReadinessCheck::new(),
        ))
    }

    #[tokio::test]
    async fn invalid_address_is_a_bind_error() {
        assert!(matches!(
            Server::bind("not-an-address").await,
            Err(ServerError::Bind(_))
        ));
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let listener = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = probes_only();
        let shutdown = ShutdownSignal::new();
        let server = tokio::spawn(
            Server::new(Arc::clone(&router), Duration::from_secs(1)).serve(listener, shutdown.clone()),
        );

        let client = reqwest::Client::new();
        let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
        assert_eq!(health.status(), 200);
        let missing = client.get(format!("http://{addr}/nope")).send().await.unwrap();
        assert_eq!(missing.status(), 404);
        assert_eq!(
            missing.json::<serde_json::Value>().await.unwrap()["error"],
            "not found"
        );

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!router.readiness().is_ready());
    }
}
