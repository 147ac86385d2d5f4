//! Authorization engine.
//!
//! Turns either a redeemed external-login session or a local credential submission into
//! a single-use authorization code and the redirect that carries it back to the client.

use crate::error::OidcError;
use crate::oauth2::model::{AuthorizationCode, Identity};
use crate::oauth2::state::OAuth2State;
use url::Url;

/// Parameters of an authorization request.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub external_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Send the browser to this URL (carries `code` and `state`).
    Redirect(String),
    /// Ask the user for credentials.
    Interactive,
}

/// Begin or continue an authorization.
///
/// With an external session id that is completed, carries an identity and has not
/// expired, the session is consumed and a code is minted. Any other session state falls
/// through to the interactive form. Missing `client_id`/`redirect_uri` are taken from
/// the values recorded on the session.
#[tracing::instrument(skip_all, fields(client_id = %request.client_id))]
pub fn begin_authorization(
    state: &OAuth2State,
    request: &AuthorizationRequest,
) -> Result<AuthorizeOutcome, OidcError> {
    let Some(session_id) = request
        .external_session_id
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        return Ok(AuthorizeOutcome::Interactive);
    };

    let now = state.clock.now();
    let Some(session) = state.bridge.session(session_id) else {
        tracing::debug!("External session not found, showing login form");
        return Ok(AuthorizeOutcome::Interactive);
    };
    if !session.is_redeemable(now) {
        tracing::debug!(
            status = %session.effective_status(now),
            "External session not redeemable, showing login form"
        );
        return Ok(AuthorizeOutcome::Interactive);
    }

    let client_id = non_empty(&request.client_id)
        .or(session.client_id.as_deref())
        .unwrap_or_default()
        .to_string();
    let redirect_uri = non_empty(&request.redirect_uri)
        .or(session.redirect_uri.as_deref())
        .unwrap_or_default()
        .to_string();
    let oauth_state = non_empty(&request.state).unwrap_or(&session.originating_oauth_state);

    // Validate before consuming so a bad redirect does not burn the session.
    let target = parse_redirect_uri(&redirect_uri)?;

    let Some(session) = state.bridge.redeem(session_id) else {
        tracing::debug!("External session redeemed concurrently, showing login form");
        return Ok(AuthorizeOutcome::Interactive);
    };
    let Some(identity) = session.resolved_identity else {
        return Ok(AuthorizeOutcome::Interactive);
    };

    let code = issue_code(state, identity, &client_id, &redirect_uri);
    Ok(AuthorizeOutcome::Redirect(redirect_with_code(
        target,
        &code,
        oauth_state,
    )))
}

/// Local credential check. Any non-empty password is accepted for a known user.
#[tracing::instrument(skip(state, password, redirect_uri, oauth_state))]
pub fn submit_credentials(
    state: &OAuth2State,
    username: &str,
    password: &str,
    client_id: &str,
    redirect_uri: &str,
    oauth_state: &str,
) -> Result<String, OidcError> {
    let identity = state
        .directory
        .get(username)
        .filter(|_| !password.is_empty())
        .cloned()
        .ok_or_else(|| OidcError::Unauthenticated("Invalid username or password".into()))?;

    let target = parse_redirect_uri(redirect_uri)?;
    let code = issue_code(state, identity, client_id, redirect_uri);
    tracing::info!("Local login succeeded");
    Ok(redirect_with_code(target, &code, oauth_state))
}

fn issue_code(
    state: &OAuth2State,
    identity: Identity,
    client_id: &str,
    redirect_uri: &str,
) -> String {
    let now = state.clock.now();
    let code = OAuth2State::generate_token();
    tracing::info!(subject = %identity.subject_id, client_id, "Authorization code issued");
    state.store.put_code(AuthorizationCode {
        code: code.clone(),
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        identity,
        issued_at: now,
        expires_at: now + state.authorization_code_ttl(),
    });
    code
}

fn parse_redirect_uri(redirect_uri: &str) -> Result<Url, OidcError> {
    if redirect_uri.is_empty() {
        return Err(OidcError::BadRequest("redirect_uri is required".into()));
    }
    Url::parse(redirect_uri)
        .map_err(|e| OidcError::BadRequest(format!("Invalid redirect_uri: {e}")))
}

/// Append `code` and `state` to the redirect, replacing any the client already put there.
pub fn redirect_with_code(mut target: Url, code: &str, oauth_state: &str) -> String {
    let kept: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(k, _)| k != "code" && k != "state")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    target
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("code", code)
        .append_pair("state", oauth_state);
    target.to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}
