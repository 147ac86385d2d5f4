//! Identity resolution.
//!
//! Local identities come from the configured user table. External identities are
//! synthesized from the account number reported by the helper, and access tokens are
//! mapped back to the identity they were issued for.

use crate::clock::Clock;
use crate::config::UserConfig;
use crate::error::OidcError;
use crate::oauth2::model::Identity;
use crate::store::SessionStore;
use std::collections::{BTreeMap, BTreeSet};

/// Subject prefix for identities confirmed through the QQ channel.
pub const EXTERNAL_SUBJECT_PREFIX: &str = "qq_";

/// Pre-provisioned local accounts, keyed by username.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<String, Identity>,
}

impl UserDirectory {
    pub fn from_config(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                let identity = Identity {
                    subject_id: u.username.clone(),
                    username: u.username.clone(),
                    email: u.email.clone(),
                    display_name: u.name.clone(),
                    groups: u.groups.iter().cloned().collect(),
                };
                (u.username.clone(), identity)
            })
            .collect();
        Self { users }
    }

    pub fn get(&self, username: &str) -> Option<&Identity> {
        self.users.get(username)
    }

    /// Accounts in username order, for the login form and home page.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Builds the identity for a confirmed external account.
///
/// The subject is derived only from the account number, so the same account always maps
/// to the same subject.
pub fn external_identity(
    account_id: &str,
    display_name: Option<&str>,
    default_groups: &BTreeSet<String>,
) -> Identity {
    let subject = format!("{EXTERNAL_SUBJECT_PREFIX}{account_id}");
    let display_name = display_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("QQ user {account_id}"));

    Identity {
        subject_id: subject.clone(),
        username: subject,
        email: format!("{account_id}@qq.com"),
        display_name,
        groups: default_groups.clone(),
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, OidcError> {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            OidcError::Unauthenticated("Missing or invalid Authorization header".into())
        })
}

/// Maps a bearer header to the identity its access token was issued for.
#[tracing::instrument(skip_all)]
pub fn resolve(
    store: &dyn SessionStore,
    clock: &dyn Clock,
    authorization: Option<&str>,
) -> Result<Identity, OidcError> {
    let token = bearer_token(authorization)?;
    store
        .get_token(token, clock.now())
        .map(|t| t.identity)
        .ok_or_else(|| OidcError::Unauthenticated("Unknown or expired access token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::oauth2::model::AccessToken;
    use crate::store::MemoryStore;
    use time::Duration;

    fn groups() -> BTreeSet<String> {
        BTreeSet::from(["all".to_string()])
    }

    #[test]
    fn external_identity_is_deterministic() {
        let a = external_identity("12345", Some("Alice"), &groups());
        let b = external_identity("12345", Some("Someone else"), &groups());
        assert_eq!(a.subject_id, "qq_12345");
        assert_eq!(a.subject_id, b.subject_id);
        assert_eq!(a.email, "12345@qq.com");
        assert_eq!(a.display_name, "Alice");
        assert!(a.groups.contains("all"));
    }

    #[test]
    fn external_identity_falls_back_to_account_name() {
        let id = external_identity("777", Some("  "), &groups());
        assert_eq!(id.display_name, "QQ user 777");
        let id = external_identity("777", None, &groups());
        assert_eq!(id.display_name, "QQ user 777");
    }

    #[test]
    fn directory_is_built_from_config() {
        let directory = UserDirectory::from_config(&crate::config::AppConfig::default().users);
        let admin = directory.get("admin").expect("admin exists");
        assert_eq!(admin.email, "admin@test.com");
        assert!(admin.groups.contains("ops"));
        assert!(directory.get("nobody").is_none());
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn bearer_header_format_is_enforced() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(None).is_err());
    }

    #[test]
    fn resolve_rejects_expired_tokens() {
        let store = MemoryStore::new();
        let clock = ManualClock::starting_now();
        let now = clock.now();
        let identity = external_identity("1", None, &groups());
        store.put_token(AccessToken {
            token: "tok".into(),
            client_id: "c1".into(),
            identity: identity.clone(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        });

        assert_eq!(resolve(&store, &clock, Some("Bearer tok")), Ok(identity));
        assert!(resolve(&store, &clock, Some("Bearer other")).is_err());

        clock.advance(Duration::hours(2));
        assert!(matches!(
            resolve(&store, &clock, Some("Bearer tok")),
            Err(OidcError::Unauthenticated(_))
        ));
    }
}
