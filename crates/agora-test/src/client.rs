//! In-memory test client.

use crate::error::TestError;
use crate::request::TestRequestBuilder;
use crate::response::TestResponse;
use bytes::Bytes;
use http_body_util::Full;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

type Request = http::Request<Full<Bytes>>;
type Response = http::Response<Full<Bytes>>;

/// Request dispatcher the client drives.
pub type TestHandler = Arc<
    dyn Fn(Request, Option<IpAddr>) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync,
>;

/// Sends requests straight into a dispatcher, without a socket.
///
/// ```ignore
/// let client = TestClient::new(move |req, peer| {
///     let router = router.clone();
///     async move { router.dispatch(req, peer).await }
/// });
/// let response = client.send(TestRequest::get("/health")).await?;
/// ```
#[derive(Clone)]
pub struct TestClient {
    handler: TestHandler,
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient").finish_non_exhaustive()
    }
}

impl TestClient {
    /// Creates a client over `handler`.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request, Option<IpAddr>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |req, peer| Box::pin(handler(req, peer))),
        }
    }

    /// Builds and sends a request, collecting the response.
    pub async fn send(&self, request: TestRequestBuilder) -> Result<TestResponse, TestError> {
        let request = request.build()?;
        let response = (self.handler)(request.request, request.peer).await;
        TestResponse::from_http(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TestRequest;
    use http::StatusCode;

    #[tokio::test]
    async fn echoes_through_handler() {
        let client = TestClient::new(|req: Request, peer| async move {
            let body = serde_json::json!({
                "path": req.uri().path(),
                "peer": peer.map(|p| p.to_string()),
            });
            http::Response::new(Full::new(Bytes::from(body.to_string())))
        });
        let response = client
            .send(TestRequest::get("/health").peer([10, 0, 0, 1]))
            .await
            .unwrap();
        response.assert_status(StatusCode::OK);
        let body = response.json_value().unwrap();
        assert_eq!(body["path"], "/health");
        assert_eq!(body["peer"], "10.0.0.1");
    }
}
