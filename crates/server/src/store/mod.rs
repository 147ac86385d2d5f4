//! Storage for issued codes, access tokens and external-login sessions.
//!
//! The three collections are independent: no operation touches more than one of
//! them, so implementations never need a cross-collection lock order.

mod memory;

pub use memory::MemoryStore;

use crate::oauth2::model::{AccessToken, AuthorizationCode, ExternalLoginSession};
use time::{Duration, OffsetDateTime};

/// Outcome of [`SessionStore::update_session`].
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome<T> {
    /// No session with that id.
    Missing,
    /// The closure ran while the entry was locked and returned `T`.
    Applied(T),
}

/// What a sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub codes: usize,
    pub tokens: usize,
    /// Ids of the evicted external-login sessions.
    pub sessions: Vec<String>,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.codes + self.tokens + self.sessions.len()
    }
}

/// Entry counts per collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub codes: usize,
    pub tokens: usize,
    pub sessions: usize,
}

/// Keyed storage with per-operation atomicity.
///
/// Code and token lookups treat entries past `expires_at` as absent. The `take_*_if`
/// operations remove an entry only when the predicate holds, as one atomic step, so two
/// callers can never both receive the same entry.
pub trait SessionStore: Send + Sync {
    fn put_code(&self, code: AuthorizationCode);
    fn get_code(&self, code: &str, now: OffsetDateTime) -> Option<AuthorizationCode>;
    fn take_code_if(
        &self,
        code: &str,
        predicate: &dyn Fn(&AuthorizationCode) -> bool,
    ) -> Option<AuthorizationCode>;
    fn delete_code(&self, code: &str) -> bool;

    fn put_token(&self, token: AccessToken);
    fn get_token(&self, token: &str, now: OffsetDateTime) -> Option<AccessToken>;
    fn delete_token(&self, token: &str) -> bool;

    fn put_session(&self, session: ExternalLoginSession);
    fn get_session(&self, session_id: &str) -> Option<ExternalLoginSession>;
    /// Runs `apply` against the stored session while holding its entry lock.
    fn update_session(
        &self,
        session_id: &str,
        apply: &mut dyn FnMut(&mut ExternalLoginSession) -> Result<(), crate::error::OidcError>,
    ) -> UpdateOutcome<Result<ExternalLoginSession, crate::error::OidcError>>;
    fn take_session_if(
        &self,
        session_id: &str,
        predicate: &dyn Fn(&ExternalLoginSession) -> bool,
    ) -> Option<ExternalLoginSession>;
    fn delete_session(&self, session_id: &str) -> bool;

    /// Evicts expired codes and tokens, and sessions that expired more than
    /// `session_retention` ago.
    fn sweep_expired(&self, now: OffsetDateTime, session_retention: Duration) -> SweepStats;

    fn counts(&self) -> StoreCounts;
}
