//! Test request builder.

use crate::error::TestError;
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use http_body_util::Full;
use serde::Serialize;
use std::net::IpAddr;

/// A built request plus the peer address it appears to come from.
#[derive(Debug)]
pub struct TestRequest {
    /// The HTTP request.
    pub request: http::Request<Full<Bytes>>,
    /// Socket peer address.
    pub peer: Option<IpAddr>,
}

impl TestRequest {
    /// Starts a `GET` request.
    pub fn get(uri: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::GET, uri)
    }

    /// Starts a `POST` request.
    pub fn post(uri: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::POST, uri)
    }

    /// Starts a `DELETE` request.
    pub fn delete(uri: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::DELETE, uri)
    }
}

/// Fluent builder for [`TestRequest`].
///
/// Invalid headers are reported by [`TestRequestBuilder::build`].
#[derive(Debug)]
#[must_use]
pub struct TestRequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    cookies: Vec<String>,
    body: Bytes,
    peer: Option<IpAddr>,
    error: Option<String>,
}

impl TestRequestBuilder {
    /// Creates a builder.
    pub fn new(method: Method, uri: impl AsRef<str>) -> Self {
        Self {
            method,
            uri: uri.as_ref().to_string(),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            peer: Some(IpAddr::from([127, 0, 0, 1])),
            error: None,
        }
    }

    /// Sets a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.error = Some(format!("invalid header {}", name.as_ref())),
        }
        self
    }

    /// Adds a cookie.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(format!("{name}={value}"));
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        self.header(
            header::AUTHORIZATION.as_str(),
            format!("Bearer {}", token.as_ref()),
        )
    }

    /// Sets a JSON body and content type.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.body = Bytes::from(bytes),
            Err(e) => self.error = Some(e.to_string()),
        }
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
    }

    /// Sets a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the peer address.
    pub fn peer(mut self, ip: impl Into<IpAddr>) -> Self {
        self.peer = Some(ip.into());
        self
    }

    /// Builds the request.
    pub fn build(self) -> Result<TestRequest, TestError> {
        if let Some(error) = self.error {
            return Err(TestError::RequestBuild(error));
        }
        let mut builder = http::Request::builder().method(self.method).uri(&self.uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
            if !self.cookies.is_empty() {
                let cookie = HeaderValue::try_from(self.cookies.join("; "))
                    .map_err(|e| TestError::RequestBuild(e.to_string()))?;
                headers.insert(header::COOKIE, cookie);
            }
        }
        let request = builder
            .body(Full::new(self.body))
            .map_err(|e| TestError::RequestBuild(e.to_string()))?;
        Ok(TestRequest {
            request,
            peer: self.peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_cookies_and_json() {
        let built = TestRequest::post("/post/create")
            .cookie("jwt", "abc")
            .cookie("theme", "dark")
            .json(&serde_json::json!({ "body": "hi" }))
            .peer([203, 0, 113, 1])
            .build()
            .unwrap();
        assert_eq!(built.request.method(), Method::POST);
        assert_eq!(built.request.headers()["cookie"], "jwt=abc; theme=dark");
        assert_eq!(built.request.headers()["content-type"], "application/json");
        assert_eq!(built.peer, Some(IpAddr::from([203, 0, 113, 1])));
    }

    #[test]
    fn invalid_header_fails_at_build() {
        let err = TestRequest::get("/").header("bad header", "x").build().unwrap_err();
        assert!(matches!(err, TestError::RequestBuild(_)));
    }
}
