//! Token engine: authorization code to access token exchange.

use crate::error::OidcError;
use crate::oauth2::model::AccessToken;
use crate::oauth2::state::OAuth2State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const AUTHORIZATION_CODE_GRANT: &str = "authorization_code";

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    /// When present it must match the value the code was issued for.
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Opaque random value; not a signed JWT.
    pub id_token: String,
}

/// Exchange an authorization code for an access token.
///
/// Checks run in order: client secret, grant type, code. The code is removed in the same
/// step that validates it, so it can be exchanged at most once.
#[tracing::instrument(skip_all, fields(client_id = request.client_id.as_deref().unwrap_or_default()))]
pub fn exchange(state: &OAuth2State, request: &TokenRequest) -> Result<TokenResponse, OidcError> {
    if request.client_secret.as_deref() != Some(state.config.client.secret.as_str()) {
        tracing::warn!("Token request with invalid client credentials");
        return Err(OidcError::InvalidClient);
    }
    if request.grant_type != AUTHORIZATION_CODE_GRANT {
        return Err(OidcError::UnsupportedGrant(format!(
            "Only {AUTHORIZATION_CODE_GRANT} is supported"
        )));
    }
    let code = request
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OidcError::InvalidGrant("code is required".into()))?;

    let now = state.clock.now();
    let client_id = request.client_id.as_deref().unwrap_or_default();
    let redirect_uri = request.redirect_uri.as_deref().filter(|r| !r.is_empty());

    let Some(grant) = state.store.take_code_if(code, &|c| {
        !c.is_expired(now)
            && c.client_id == client_id
            && redirect_uri.is_none_or(|r| r == c.redirect_uri)
    }) else {
        let reason = match state.store.get_code(code, now) {
            Some(c) if c.client_id != client_id => "Client ID mismatch",
            Some(_) => "redirect_uri mismatch",
            None => "Invalid or expired code",
        };
        tracing::warn!(reason, "Code exchange rejected");
        return Err(OidcError::InvalidGrant(reason.into()));
    };

    let ttl = state.access_token_ttl();
    let access_token = OAuth2State::generate_token();
    state.store.put_token(AccessToken {
        token: access_token.clone(),
        client_id: grant.client_id,
        identity: grant.identity,
        issued_at: now,
        expires_at: now + ttl,
    });
    tracing::info!("Access token issued");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ttl.whole_seconds(),
        id_token: OAuth2State::generate_id_token(),
    })
}
