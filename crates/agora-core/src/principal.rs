//! Caller identity.

use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated identity attached to a request.
///
/// Created by the gateway's auth stage from a verified credential and dropped
/// when the request ends. Never shared across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    user_id: UserId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Principal {
    /// Creates a principal for a verified user.
    #[must_use]
    pub const fn new(user_id: UserId, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            issued_at,
            expires_at,
        }
    }

    /// Returns the user ID.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns when the credential was issued.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Returns when the credential expires.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Who is making a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Caller {
    /// No credential was presented (or the route does not authenticate).
    #[default]
    Anonymous,
    /// A verified principal.
    Authenticated(Principal),
}

impl Caller {
    /// Returns the principal, if authenticated.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Anonymous => None,
        }
    }

    /// Returns the user ID, if authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.principal().map(Principal::user_id)
    }

    /// Returns `true` for anonymous callers.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl From<Principal> for Caller {
    fn from(principal: Principal) -> Self {
        Self::Authenticated(principal)
    }
}
