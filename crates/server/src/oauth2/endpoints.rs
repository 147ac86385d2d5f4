//! OAuth2 / OpenID Connect HTTP endpoints.
//!
//! - Home page
//! - Discovery document
//! - Authorization endpoint (form and submission)
//! - Token endpoint
//! - UserInfo
//! - JWKS

use crate::error::{ErrorResponse, OidcError};
use crate::oauth2::authorize::{
    AuthorizationRequest, AuthorizeOutcome, begin_authorization, submit_credentials,
};
use crate::oauth2::identity;
use crate::oauth2::login::{HomeTemplate, LoginTemplate, render};
use crate::oauth2::model::UserInfo;
use crate::oauth2::token::{TokenRequest, TokenResponse, exchange};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(home))
        .routes(routes!(openid_configuration))
        .routes(routes!(openid_configuration_legacy))
        .routes(routes!(authorize, authorize_submit))
        .routes(routes!(token))
        .routes(routes!(userinfo))
        .routes(routes!(jwks))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Authorization request parameters. All are optional so a bare `/auth` shows the form.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    /// External-login session to redeem.
    pub qq_session: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
}

/// Local login form.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
}

impl OpenIdConfiguration {
    fn for_issuer(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{issuer}/auth"),
            token_endpoint: format!("{issuer}/token"),
            userinfo_endpoint: format!("{issuer}/userinfo"),
            jwks_uri: format!("{issuer}/jwks"),
            response_types_supported: strings(&["code"]),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: strings(&["none"]),
            scopes_supported: strings(&["openid", "profile", "email", "groups"]),
            token_endpoint_auth_methods_supported: strings(&[
                "client_secret_basic",
                "client_secret_post",
            ]),
            claims_supported: strings(&["sub", "preferred_username", "email", "name", "groups"]),
            grant_types_supported: strings(&["authorization_code"]),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JsonWebKeySet {
    pub keys: Vec<serde_json::Value>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// Home page describing the provider.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/",
    tag = OAUTH2_TAG,
    operation_id = "Home",
    summary = "Provider overview",
    description = "Lists the issuer, client id, endpoints and pre-provisioned test users.",
    responses(
        (status = 200, description = "Home page HTML", content_type = "text/html"),
    )
)]
pub async fn home(State(state): State<OAuth2State>) -> Response {
    render(&HomeTemplate::new(&state), StatusCode::OK)
}

/// OpenID Connect discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Configuration",
    summary = "OpenID Connect discovery",
    responses(
        (status = 200, description = "Discovery document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    Json(OpenIdConfiguration::for_issuer(state.config.issuer()))
}

/// Same document at the underscore path some relying parties were configured with.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid_configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Configuration (underscore path)",
    summary = "OpenID Connect discovery (alternate path)",
    responses(
        (status = 200, description = "Discovery document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration_legacy(
    State(state): State<OAuth2State>,
) -> Json<OpenIdConfiguration> {
    Json(OpenIdConfiguration::for_issuer(state.config.issuer()))
}

/// Authorization endpoint.
#[tracing::instrument(skip(state, params), fields(client_id = %params.client_id))]
#[utoipa::path(
    get,
    path = "/auth",
    tag = OAUTH2_TAG,
    operation_id = "Authorize",
    summary = "Begin or continue authorization",
    description = "Without `qq_session`, renders the login form. With a `qq_session` that has completed, \
                   consumes the session and redirects to `redirect_uri` with `code` and `state`. \
                   A session that is not yet completed falls back to the login form.\n\n\
                   `client_id` and `redirect_uri` default to the values recorded when the session was created.",
    params(
        ("client_id" = Option<String>, Query, description = "Client identifier"),
        ("redirect_uri" = Option<String>, Query, description = "Where to send the code"),
        ("state" = Option<String>, Query, description = "Opaque value returned with the code"),
        ("qq_session" = Option<String>, Query, description = "External-login session to redeem"),
    ),
    responses(
        (status = 200, description = "Login form", content_type = "text/html"),
        (status = 302, description = "Redirect to the client with an authorization code"),
        (status = 400, description = "Invalid redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    Query(params): Query<AuthorizeQuery>,
) -> Response {
    let request = AuthorizationRequest {
        client_id: params.client_id,
        redirect_uri: params.redirect_uri,
        state: params.state,
        external_session_id: params.qq_session,
    };
    match begin_authorization(&state, &request) {
        Ok(AuthorizeOutcome::Redirect(location)) => {
            if let Some(session_id) = &request.external_session_id {
                state.discard_qr_code(session_id).await;
            }
            found(&location)
        }
        Ok(AuthorizeOutcome::Interactive) => render(
            &LoginTemplate::new(
                &state,
                &request.client_id,
                &request.redirect_uri,
                &request.state,
                None,
            ),
            StatusCode::OK,
        ),
        Err(e) => e.into_response(),
    }
}

/// Local login submission.
#[tracing::instrument(skip(state, form), fields(username = %form.username))]
#[utoipa::path(
    post,
    path = "/auth",
    tag = OAUTH2_TAG,
    operation_id = "Authorize Submit",
    summary = "Submit local credentials",
    description = "Accepts any non-empty password for a known user. On success redirects to \
                   `redirect_uri` with `code` and `state`; on failure re-renders the form with 401.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 302, description = "Redirect to the client with an authorization code"),
        (status = 400, description = "Invalid redirect_uri", body = ErrorResponse),
        (status = 401, description = "Login form with an error", content_type = "text/html"),
    )
)]
pub async fn authorize_submit(
    State(state): State<OAuth2State>,
    Form(form): Form<LoginForm>,
) -> Response {
    match submit_credentials(
        &state,
        form.username.trim(),
        &form.password,
        &form.client_id,
        &form.redirect_uri,
        &form.state,
    ) {
        Ok(location) => found(&location),
        Err(OidcError::Unauthenticated(message)) => {
            tracing::info!("Local login rejected");
            render(
                &LoginTemplate::new(
                    &state,
                    &form.client_id,
                    &form.redirect_uri,
                    &form.state,
                    Some(message),
                ),
                StatusCode::UNAUTHORIZED,
            )
        }
        Err(e) => e.into_response(),
    }
}

/// Token endpoint.
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "Token",
    summary = "Exchange an authorization code for tokens",
    description = "Client credentials are read from HTTP Basic auth or from `client_id`/`client_secret` \
                   in the body. Only the `authorization_code` grant is supported and each code can be \
                   exchanged once.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Unsupported grant or invalid code", body = ErrorResponse),
        (status = 401, description = "Invalid client credentials", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(mut params): Form<TokenRequest>,
) -> Response {
    let (client_id, client_secret) = extract_client_credentials(&headers, &params);
    params.client_id = client_id;
    params.client_secret = client_secret;

    match exchange(&state, &params) {
        Ok(response) => (
            [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
            Json(response),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect UserInfo.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "UserInfo",
    summary = "Identity behind an access token",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "User claims", body = UserInfo),
        (status = 401, description = "Missing, unknown or expired token", body = ErrorResponse),
    )
)]
pub async fn userinfo(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match identity::resolve(state.store.as_ref(), state.clock.as_ref(), authorization) {
        Ok(identity) => Json(UserInfo::from(&identity)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Key set. Tokens are not signed, so it is always empty.
#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/jwks",
    tag = OAUTH2_TAG,
    operation_id = "JWKS",
    summary = "Signing keys",
    responses(
        (status = 200, description = "Empty key set", body = JsonWebKeySet),
    )
)]
pub async fn jwks() -> Json<JsonWebKeySet> {
    Json(JsonWebKeySet { keys: Vec::new() })
}

// =============================================================================
// Helpers
// =============================================================================

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Basic auth wins over the form body.
fn extract_client_credentials(
    headers: &HeaderMap,
    params: &TokenRequest,
) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        let id = urlencoding::decode(id).map_or_else(|_| id.to_string(), |s| s.into_owned());
        let secret =
            urlencoding::decode(secret).map_or_else(|_| secret.to_string(), |s| s.into_owned());
        return (Some(id), Some(secret));
    }

    (params.client_id.clone(), params.client_secret.clone())
}
