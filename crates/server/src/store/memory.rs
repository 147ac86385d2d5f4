use crate::error::OidcError;
use crate::oauth2::model::{AccessToken, AuthorizationCode, ExternalLoginSession};
use crate::store::{SessionStore, StoreCounts, SweepStats, UpdateOutcome};
use dashmap::DashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// In-process store backed by one `DashMap` per collection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    codes: Arc<DashMap<String, AuthorizationCode>>,
    tokens: Arc<DashMap<String, AccessToken>>,
    sessions: Arc<DashMap<String, ExternalLoginSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn put_code(&self, code: AuthorizationCode) {
        self.codes.insert(code.code.clone(), code);
    }

    fn get_code(&self, code: &str, now: OffsetDateTime) -> Option<AuthorizationCode> {
        self.codes
            .get(code)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value().clone())
    }

    fn take_code_if(
        &self,
        code: &str,
        predicate: &dyn Fn(&AuthorizationCode) -> bool,
    ) -> Option<AuthorizationCode> {
        self.codes
            .remove_if(code, |_, entry| predicate(entry))
            .map(|(_, entry)| entry)
    }

    fn delete_code(&self, code: &str) -> bool {
        self.codes.remove(code).is_some()
    }

    fn put_token(&self, token: AccessToken) {
        self.tokens.insert(token.token.clone(), token);
    }

    fn get_token(&self, token: &str, now: OffsetDateTime) -> Option<AccessToken> {
        self.tokens
            .get(token)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value().clone())
    }

    fn delete_token(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    fn put_session(&self, session: ExternalLoginSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    fn get_session(&self, session_id: &str) -> Option<ExternalLoginSession> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    fn update_session(
        &self,
        session_id: &str,
        apply: &mut dyn FnMut(&mut ExternalLoginSession) -> Result<(), OidcError>,
    ) -> UpdateOutcome<Result<ExternalLoginSession, OidcError>> {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return UpdateOutcome::Missing;
        };
        // Work on a copy so a rejected update leaves the stored session untouched.
        let mut candidate = entry.value().clone();
        let result = apply(&mut candidate).map(|()| {
            *entry.value_mut() = candidate.clone();
            candidate
        });
        UpdateOutcome::Applied(result)
    }

    fn take_session_if(
        &self,
        session_id: &str,
        predicate: &dyn Fn(&ExternalLoginSession) -> bool,
    ) -> Option<ExternalLoginSession> {
        self.sessions
            .remove_if(session_id, |_, session| predicate(session))
            .map(|(_, session)| session)
    }

    fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    fn sweep_expired(&self, now: OffsetDateTime, session_retention: Duration) -> SweepStats {
        let mut stats = SweepStats::default();
        self.codes.retain(|_, code| {
            let keep = !code.is_expired(now);
            stats.codes += usize::from(!keep);
            keep
        });
        self.tokens.retain(|_, token| {
            let keep = !token.is_expired(now);
            stats.tokens += usize::from(!keep);
            keep
        });
        self.sessions.retain(|id, session| {
            let keep = now <= session.expires_at + session_retention;
            if !keep {
                stats.sessions.push(id.clone());
            }
            keep
        });
        stats
    }

    fn counts(&self) -> StoreCounts {
        StoreCounts {
            codes: self.codes.len(),
            tokens: self.tokens.len(),
            sessions: self.sessions.len(),
        }
    }
}
