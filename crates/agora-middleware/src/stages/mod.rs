//! Gateway stages.
//!
//! | Stage | Rejects with |
//! |-------|--------------|
//! | [`MethodGate`] | 405 + `Allow` |
//! | [`RateLimitStage`] | 429 + `Retry-After` |
//! | [`AuthStage`] | 401 |
//! | [`ContextEnrichStage`] | never |

mod auth;
mod enrich;
mod method_gate;
mod rate_limit;

pub use auth::AuthStage;
pub use enrich::ContextEnrichStage;
pub use method_gate::MethodGate;
pub use rate_limit::{FailMode, RateLimitStage};
