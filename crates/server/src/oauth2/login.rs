//! HTML pages: home, login form, and the external-login polling page.

use crate::oauth2::state::OAuth2State;
use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// A local account as shown on the login and home pages.
#[derive(Debug, Clone)]
pub struct UserOption {
    pub username: String,
    pub name: String,
    pub email: String,
    pub groups: String,
}

fn user_options(state: &OAuth2State) -> Vec<UserOption> {
    state
        .directory
        .iter()
        .map(|identity| UserOption {
            username: identity.username.clone(),
            name: identity.display_name.clone(),
            email: identity.email.clone(),
            groups: identity
                .groups
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

/// Login page template.
#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub users: Vec<UserOption>,
    pub error: Option<String>,
    /// `/qq/login` with the authorization parameters forwarded.
    pub qq_login_url: String,
}

impl LoginTemplate {
    pub fn new(
        state: &OAuth2State,
        client_id: &str,
        redirect_uri: &str,
        oauth_state: &str,
        error: Option<String>,
    ) -> Self {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("state", oauth_state)
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .finish();
        Self {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            state: oauth_state.to_string(),
            users: user_options(state),
            error,
            qq_login_url: format!("/qq/login?{query}"),
        }
    }
}

#[derive(Template)]
#[template(path = "qq_login.html")]
pub struct QqLoginTemplate {
    pub session_id: String,
    pub qrcode_url: String,
    pub status_url: String,
    /// Where the browser goes once the session reports `completed`.
    pub continue_url: String,
    pub poll_interval_ms: u64,
    pub ttl_secs: i64,
}

impl QqLoginTemplate {
    pub fn new(state: &OAuth2State, session_id: &str, continue_url: String) -> Self {
        let encoded = urlencoding::encode(session_id);
        Self {
            session_id: session_id.to_string(),
            qrcode_url: format!("/qq/qrcode/{encoded}"),
            status_url: format!("/qq/status/{encoded}"),
            continue_url,
            poll_interval_ms: state.config.external_login.poll_interval_ms,
            ttl_secs: state.bridge.session_ttl().whole_seconds(),
        }
    }
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub issuer: String,
    pub client_id: String,
    pub users: Vec<UserOption>,
}

impl HomeTemplate {
    pub fn new(state: &OAuth2State) -> Self {
        Self {
            issuer: state.config.issuer().to_string(),
            client_id: state.config.client.id.clone(),
            users: user_options(state),
        }
    }
}

/// Render `template` with `status`, or a plain 500 if rendering fails.
pub fn render<T: Template>(template: &T, status: StatusCode) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
