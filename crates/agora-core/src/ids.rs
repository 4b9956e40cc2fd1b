//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque user identifier issued by the users service.
pub type UserId = i64;

/// Post identifier.
pub type PostId = i64;

/// Group identifier. Zero means "no group".
pub type GroupId = i64;

/// Image identifier issued by the media service.
pub type ImageId = i64;

/// Unique identifier for a single request.
///
/// Request IDs are UUID v7 and are minted fresh for every request; incoming
/// request-ID headers are never reused.
///
/// # Example
///
/// ```
/// use agora_core::RequestId;
///
/// let a = RequestId::new();
/// let b = RequestId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distributed trace identifier.
///
/// Either propagated verbatim from an incoming header or minted as a fresh
/// 128-bit random value rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Longest header value accepted as a propagated trace ID.
    pub const MAX_LEN: usize = 128;

    /// Mints a fresh random trace ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accepts a propagated trace ID if it is a plausible header token.
    ///
    /// Empty values, values longer than [`Self::MAX_LEN`], and values with
    /// characters outside `[A-Za-z0-9-_.:]` are rejected.
    ///
    /// # Example
    ///
    /// ```
    /// use agora_core::TraceId;
    ///
    /// assert!(TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").is_some());
    /// assert!(TraceId::parse("").is_none());
    /// assert!(TraceId::parse("bad value").is_none());
    /// ```
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.len() > Self::MAX_LEN {
            return None;
        }
        let valid = value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
        valid.then(|| Self(value.to_string()))
    }

    /// Returns the trace ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_trace_ids_are_128_bit_hex() {
        let id = TraceId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(id, TraceId::generate());
    }

    #[test]
    fn parse_rejects_oversized_values() {
        let long = "a".repeat(TraceId::MAX_LEN + 1);
        assert!(TraceId::parse(&long).is_none());
        assert!(TraceId::parse(&"a".repeat(TraceId::MAX_LEN)).is_some());
    }

    #[test]
    fn parse_trims_whitespace() {
        let id = TraceId::parse("  abc-123  ").unwrap();
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn request_id_display_is_uuid() {
        let id = RequestId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }
}
