//! Credential verification.
//!
//! Credentials are compact HS256 JWTs. The claims carry the user ID as `sub`
//! plus `iat`/`exp` (and optionally `nbf`) in Unix seconds. Signature and
//! structure are checked by `jsonwebtoken`; the time claims are checked
//! against the gateway clock so tests can drive expiry.

use agora_core::{Principal, UserId};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a credential was rejected.
///
/// Clients only ever see a 401; the reason is recorded in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// No credential was presented.
    Missing,
    /// The signature checked out but the credential has expired.
    Expired,
    /// Malformed, unsigned, signed with another key, or not yet valid.
    Invalid,
}

impl AuthFailure {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors building a verifier or issuing a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// HS256 needs a non-empty key.
    #[error("signing secret must not be empty")]
    EmptySecret,

    /// The claims could not be encoded.
    #[error("failed to sign credential: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
}

/// HS256 signer and verifier sharing one secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    leeway: Duration,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Creates a verifier for `secret`, tolerating `leeway` of clock skew on
    /// the time claims.
    pub fn new(secret: &[u8], leeway: std::time::Duration) -> Result<Self, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub", "exp", "iat"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            leeway: Duration::from_std(leeway).unwrap_or_else(|_| Duration::zero()),
        })
    }

    /// Issues a credential for `user_id` valid from `issued_at` for `ttl`.
    pub fn sign(
        &self,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, CredentialError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            nbf: None,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }

    /// Verifies a credential at `now`.
    ///
    /// The signature is checked before any time claim, so an expired token
    /// signed with the wrong key is reported as [`AuthFailure::Invalid`].
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthFailure> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                _ => AuthFailure::Invalid,
            })?
            .claims;

        let user_id: UserId = claims.sub.parse().map_err(|_| AuthFailure::Invalid)?;
        let issued_at = timestamp(claims.iat)?;
        let expires_at = timestamp(claims.exp)?;
        if issued_at - self.leeway > now {
            return Err(AuthFailure::Invalid);
        }
        if let Some(not_before) = claims.nbf {
            if timestamp(not_before)? - self.leeway > now {
                return Err(AuthFailure::Invalid);
            }
        }
        if expires_at + self.leeway <= now {
            return Err(AuthFailure::Expired);
        }
        Ok(Principal::new(user_id, issued_at, expires_at))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, AuthFailure> {
    Utc.timestamp_opt(secs, 0).single().ok_or(AuthFailure::Invalid)
}

/// Extracts the credential from the named cookie, falling back to an
/// `Authorization: Bearer` header.
#[must_use]
pub fn extract_credential<'r>(headers: &'r http::HeaderMap, cookie_name: &str) -> Option<&'r str> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get(http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
}
