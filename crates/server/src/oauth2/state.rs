//! OAuth2 state management.
//!
//! Provides the state shared by every provider endpoint.

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::external::{CallbackOnly, Collaborator, ExternalLoginBridge, HelperProcess};
use crate::oauth2::identity::UserDirectory;
use crate::store::{MemoryStore, SessionStore, SweepStats};
use std::sync::Arc;
use time::Duration;
use tokio::task::JoinHandle;

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<UserDirectory>,
    pub bridge: ExternalLoginBridge,
}

impl OAuth2State {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        let bridge = ExternalLoginBridge::new(
            store.clone(),
            clock.clone(),
            collaborator,
            config.external_login.session_ttl(),
            config.external_login.default_groups.iter().cloned().collect(),
        );
        Self {
            directory: Arc::new(UserDirectory::from_config(&config.users)),
            config,
            store,
            clock,
            bridge,
        }
    }

    /// Production wiring: in-memory store, wall clock, and the configured helper.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let collaborator: Arc<dyn Collaborator> = match &config.external_login.helper {
            Some(helper) => Arc::new(HelperProcess::from_config(
                helper,
                &config.external_login.qr_code_dir,
                std::time::Duration::from_secs(config.external_login.session_ttl_secs),
            )),
            None => Arc::new(CallbackOnly),
        };
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            collaborator,
        )
    }

    /// Generate a secure random token
    pub fn generate_token() -> String {
        random_url_safe::<32>()
    }

    /// Opaque stand-in for an ID token. It is not a signed JWT and cannot be verified.
    pub fn generate_id_token() -> String {
        random_url_safe::<48>()
    }

    pub fn authorization_code_ttl(&self) -> Duration {
        self.config.tokens.authorization_code_ttl()
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.config.tokens.access_token_ttl()
    }

    /// Evict expired entries from the store, along with the scan images of evicted
    /// sessions.
    pub async fn sweep(&self) -> SweepStats {
        let retention = self.config.external_login.expired_retention();
        let stats = self.store.sweep_expired(self.clock.now(), retention);
        for session_id in &stats.sessions {
            self.discard_qr_code(session_id).await;
        }
        if stats.total() > 0 {
            tracing::debug!(
                codes = stats.codes,
                tokens = stats.tokens,
                sessions = stats.sessions.len(),
                "Swept expired entries"
            );
        }
        stats
    }

    /// Remove the scan image written for `session_id`, if any.
    pub async fn discard_qr_code(&self, session_id: &str) {
        let path = HelperProcess::qr_code_path(&self.config.external_login.qr_code_dir, session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed QR code"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove QR code"),
        }
    }

    /// Start the periodic background sweep.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let state = self.clone();
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                state.sweep().await;
            }
        })
    }
}

fn random_url_safe<const N: usize>() -> String {
    use base64::Engine;
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = OAuth2State::generate_token();
        let b = OAuth2State::generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn id_token_is_opaque_random() {
        let token = OAuth2State::generate_id_token();
        assert_eq!(token.len(), 64);
        assert!(!token.contains('.'));
    }
}
