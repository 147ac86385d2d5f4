//! Records held by the session store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// A resolved end-user identity. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub groups: BTreeSet<String>,
}

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub sub: String,
    pub preferred_username: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
}

impl From<&Identity> for UserInfo {
    fn from(identity: &Identity) -> Self {
        Self {
            sub: identity.subject_id.clone(),
            preferred_username: identity.username.clone(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            groups: identity.groups.iter().cloned().collect(),
        }
    }
}

/// A single-use authorization code bound to a client and redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub identity: Identity,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// An opaque bearer token issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub identity: Identity,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl AccessToken {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Lifecycle of an external-login session.
///
/// `Expired` is never stored; it is derived from the TTL whenever a session is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Scanning,
    Confirmed,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Expired
        )
    }

    /// Position along the forward-only path. All terminal states share the top rank.
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Scanning => 1,
            SessionStatus::Confirmed => 2,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Expired => 3,
        }
    }

    /// Whether a stored session in `self` may move to `next`.
    ///
    /// Repeating the current status is allowed and has no effect.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        if next == SessionStatus::Expired {
            return false;
        }
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Scanning => "scanning",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "scanning" => Ok(SessionStatus::Scanning),
            "confirmed" => Ok(SessionStatus::Confirmed),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// A pending identity confirmation driven by the external helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLoginSession {
    pub session_id: String,
    pub originating_oauth_state: String,
    /// Client that started the flow, if the login page was reached with one.
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub external_account_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub resolved_identity: Option<Identity>,
    pub error_message: Option<String>,
}

impl ExternalLoginSession {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// The status a caller should observe at `now`. Past `expires_at` every session reads
    /// as `expired`, whatever was stored.
    pub fn effective_status(&self, now: OffsetDateTime) -> SessionStatus {
        if self.is_expired(now) {
            SessionStatus::Expired
        } else {
            self.status
        }
    }

    /// Whether the session can be exchanged for an authorization code at `now`.
    pub fn is_redeemable(&self, now: OffsetDateTime) -> bool {
        self.effective_status(now) == SessionStatus::Completed && self.resolved_identity.is_some()
    }
}
