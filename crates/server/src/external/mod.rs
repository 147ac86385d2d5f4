//! External (QQ scan) login bridge.
//!
//! Reconciles the asynchronous scan/confirm flow run by an out-of-process helper with
//! the synchronous authorization-code redirect. A session moves
//! `pending -> scanning -> confirmed -> completed | failed`; once past its TTL a session
//! reads as `expired` whatever its stored status. The helper reports progress only through
//! [`ExternalLoginBridge::report_event`], and the authorization endpoint consumes a
//! completed session exactly once through [`ExternalLoginBridge::redeem`].
//!
//! ## Endpoints
//!
//! - `GET /qq/login` - Create a session and show the polling page
//! - `GET /qq/qrcode/{session}` - Scan image written by the helper
//! - `GET /qq/status/{session}` - Poll session status
//! - `POST /qq/callback` - Helper reports an event

pub mod endpoints;
mod launcher;

pub use endpoints::router;
pub use launcher::{CallbackOnly, Collaborator, HelperProcess, LaunchTask};

use crate::clock::Clock;
use crate::error::OidcError;
use crate::oauth2::identity::external_identity;
use crate::oauth2::model::{ExternalLoginSession, SessionStatus};
use crate::oauth2::state::OAuth2State;
use crate::store::{SessionStore, UpdateOutcome};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::Duration;

/// OpenAPI tag for external-login endpoints
pub const EXTERNAL_LOGIN_TAG: &str = "External Login";

/// Error recorded when the helper reports `failed` without a message.
const DEFAULT_FAILURE_MESSAGE: &str = "external login failed";

/// Authorization context captured when the user switches to the external channel.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub state: String,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

/// A progress report from the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEvent {
    pub session_id: String,
    pub status: SessionStatus,
    pub external_account_id: Option<String>,
    pub display_name: Option<String>,
    pub error: Option<String>,
}

impl ExternalEvent {
    pub fn new(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            external_account_id: None,
            display_name: None,
            error: None,
        }
    }

    pub fn completed(
        session_id: impl Into<String>,
        account_id: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            external_account_id: Some(account_id.into()),
            display_name,
            ..Self::new(session_id, SessionStatus::Completed)
        }
    }

    pub fn failed(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(session_id, SessionStatus::Failed)
        }
    }
}

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub status: SessionStatus,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ExternalLoginBridge {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    collaborator: Arc<dyn Collaborator>,
    session_ttl: Duration,
    default_groups: Arc<BTreeSet<String>>,
}

impl ExternalLoginBridge {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        collaborator: Arc<dyn Collaborator>,
        session_ttl: Duration,
        default_groups: BTreeSet<String>,
    ) -> Self {
        Self {
            store,
            clock,
            collaborator,
            session_ttl,
            default_groups: Arc::new(default_groups),
        }
    }

    /// Store a fresh `pending` session and start the helper for it.
    ///
    /// Returns as soon as the session is stored; the helper runs in the background and
    /// reports back through [`Self::report_event`]. Must be called inside a tokio runtime.
    #[tracing::instrument(skip_all, fields(state = %request.state))]
    pub fn create_session(&self, request: LoginRequest) -> String {
        let session_id = OAuth2State::generate_token();
        let now = self.clock.now();

        self.store.put_session(ExternalLoginSession {
            session_id: session_id.clone(),
            originating_oauth_state: request.state,
            client_id: request.client_id.filter(|c| !c.is_empty()),
            redirect_uri: request.redirect_uri.filter(|r| !r.is_empty()),
            external_account_id: None,
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now + self.session_ttl,
            resolved_identity: None,
            error_message: None,
        });
        tracing::info!(session = %short(&session_id), "External login session created");

        self.dispatch(&session_id);
        session_id
    }

    fn dispatch(&self, session_id: &str) {
        let launch = self.collaborator.launch(session_id);
        let bridge = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = launch.await {
                tracing::warn!(session = %short(&session_id), error = %err, "External login helper failed");
                if let Err(report_err) =
                    bridge.report_event(ExternalEvent::failed(&session_id, err.to_string()))
                {
                    tracing::debug!(
                        session = %short(&session_id),
                        error = %report_err,
                        "Helper failure not recorded"
                    );
                }
            }
        });
    }

    /// Apply a helper event to its session.
    ///
    /// The status read, the transition check, and the write (including the identity on
    /// `completed`) happen under one entry lock. Returns the resulting stored status.
    #[tracing::instrument(skip_all, fields(session = %short(&event.session_id), status = %event.status))]
    pub fn report_event(&self, event: ExternalEvent) -> Result<SessionStatus, OidcError> {
        if event.status == SessionStatus::Expired {
            return Err(OidcError::BadRequest(
                "expired is derived and cannot be reported".into(),
            ));
        }
        let account_id = event
            .external_account_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        if event.status == SessionStatus::Completed && account_id.is_none() {
            return Err(OidcError::BadRequest(
                "completed requires an external account id".into(),
            ));
        }

        let now = self.clock.now();
        let groups = self.default_groups.clone();
        let outcome = self.store.update_session(&event.session_id, &mut |session| {
            if session.is_expired(now) {
                return Err(OidcError::NotFound("session expired".into()));
            }
            if !session.status.can_advance_to(event.status) {
                return Err(OidcError::BadRequest(format!(
                    "cannot move session from {} to {}",
                    session.status, event.status
                )));
            }
            if session.status == event.status {
                return Ok(());
            }

            session.status = event.status;
            if let Some(account) = account_id {
                session.external_account_id = Some(account.to_string());
            }
            match event.status {
                SessionStatus::Completed => {
                    session.resolved_identity = account_id.map(|account| {
                        external_identity(account, event.display_name.as_deref(), &groups)
                    });
                }
                SessionStatus::Failed => {
                    session.error_message = Some(
                        event
                            .error
                            .clone()
                            .filter(|e| !e.is_empty())
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                    );
                }
                _ => {}
            }
            Ok(())
        });

        match outcome {
            UpdateOutcome::Missing => {
                tracing::warn!("Event for unknown session");
                Err(OidcError::NotFound("session not found".into()))
            }
            UpdateOutcome::Applied(Err(err)) => {
                tracing::warn!(error = %err, "Event rejected");
                Err(err)
            }
            UpdateOutcome::Applied(Ok(session)) => {
                match session.status {
                    SessionStatus::Completed => tracing::info!(
                        subject = session
                            .resolved_identity
                            .as_ref()
                            .map(|i| i.subject_id.as_str())
                            .unwrap_or_default(),
                        "External login completed"
                    ),
                    SessionStatus::Failed => tracing::info!(
                        error = session.error_message.as_deref().unwrap_or_default(),
                        "External login failed"
                    ),
                    _ => tracing::debug!("External login progressed"),
                }
                Ok(session.status)
            }
        }
    }

    /// Current status with expiry applied. Read-only.
    #[tracing::instrument(level = "debug", skip_all, fields(session = %short(session_id)))]
    pub fn poll_status(&self, session_id: &str) -> Result<StatusView, OidcError> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| OidcError::NotFound("session not found".into()))?;

        let status = session.effective_status(self.clock.now());
        let error = match status {
            SessionStatus::Failed => session.error_message,
            SessionStatus::Expired => Some("session expired".to_string()),
            _ => None,
        };
        Ok(StatusView { status, error })
    }

    /// The stored session, without expiry derivation.
    pub fn session(&self, session_id: &str) -> Option<ExternalLoginSession> {
        self.store.get_session(session_id)
    }

    /// Atomically remove and return the session if it is completed, carries an
    /// identity, and has not expired. At most one caller ever receives a given session.
    #[tracing::instrument(skip_all, fields(session = %short(session_id)))]
    pub fn redeem(&self, session_id: &str) -> Option<ExternalLoginSession> {
        let now = self.clock.now();
        let redeemed = self
            .store
            .take_session_if(session_id, &|session| session.is_redeemable(now));
        if redeemed.is_some() {
            tracing::info!("External login session redeemed");
        }
        redeemed
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

/// Log-friendly prefix of a session id.
fn short(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}
