//! External-login HTTP endpoints.

use crate::error::{ErrorResponse, OidcError};
use crate::external::{EXTERNAL_LOGIN_TAG, ExternalEvent, HelperProcess, LoginRequest};
use crate::oauth2::login::{QqLoginTemplate, render};
use crate::oauth2::model::SessionStatus;
use crate::oauth2::state::OAuth2State;
use crate::security::parse_callback;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Status reported for ids that are unknown, redeemed or swept.
pub const NOT_FOUND_STATUS: &str = "not_found";

pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(qq_login))
        .routes(routes!(qq_qrcode))
        .routes(routes!(qq_status))
        .routes(routes!(qq_callback))
}

#[derive(Debug, Default, Deserialize)]
pub struct QqLoginQuery {
    #[serde(default)]
    pub state: String,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// `pending`, `scanning`, `confirmed`, `completed`, `failed`, `expired` or `not_found`
    pub status: String,
    /// Reason for `failed`, `expired` and `not_found`; `null` otherwise.
    pub error: Option<String>,
}

/// Event posted by the helper.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackPayload {
    pub session_id: String,
    pub status: String,
    /// Account number, required with `completed`.
    pub qq_number: Option<String>,
    pub nickname: Option<String>,
    pub error: Option<String>,
}

impl TryFrom<CallbackPayload> for ExternalEvent {
    type Error = OidcError;

    fn try_from(payload: CallbackPayload) -> Result<Self, Self::Error> {
        let status = payload
            .status
            .parse::<SessionStatus>()
            .map_err(OidcError::BadRequest)?;
        Ok(ExternalEvent {
            session_id: payload.session_id,
            status,
            external_account_id: payload.qq_number,
            display_name: payload.nickname,
            error: payload.error,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    pub success: bool,
}

/// Start an external login and show the polling page.
#[tracing::instrument(skip(state, params))]
#[utoipa::path(
    get,
    path = "/qq/login",
    tag = EXTERNAL_LOGIN_TAG,
    operation_id = "QQ Login",
    summary = "Create an external-login session",
    description = "Creates a `pending` session, starts the helper in the background and renders a page \
                   that polls `/qq/status/{session}`. Once the session completes the page continues to \
                   `/auth?qq_session=...` with the original authorization parameters.",
    params(
        ("state" = Option<String>, Query, description = "OAuth2 state of the originating request"),
        ("client_id" = Option<String>, Query, description = "Client that started the flow"),
        ("redirect_uri" = Option<String>, Query, description = "Client redirect URI"),
    ),
    responses(
        (status = 200, description = "Polling page", content_type = "text/html"),
    )
)]
pub async fn qq_login(
    State(state): State<OAuth2State>,
    Query(params): Query<QqLoginQuery>,
) -> Response {
    let session_id = state.bridge.create_session(LoginRequest {
        state: params.state.clone(),
        client_id: params.client_id.clone(),
        redirect_uri: params.redirect_uri.clone(),
    });

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("qq_session", &session_id)
        .append_pair("state", &params.state);
    if let Some(client_id) = params.client_id.as_deref().filter(|c| !c.is_empty()) {
        query.append_pair("client_id", client_id);
    }
    if let Some(redirect_uri) = params.redirect_uri.as_deref().filter(|r| !r.is_empty()) {
        query.append_pair("redirect_uri", redirect_uri);
    }
    let continue_url = format!("/auth?{}", query.finish());

    render(
        &QqLoginTemplate::new(&state, &session_id, continue_url),
        StatusCode::OK,
    )
}

/// Scan image written by the helper.
#[tracing::instrument(level = "debug", skip(state))]
#[utoipa::path(
    get,
    path = "/qq/qrcode/{session}",
    tag = EXTERNAL_LOGIN_TAG,
    operation_id = "QQ QR Code",
    summary = "Fetch the scan image",
    params(("session" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "PNG image", content_type = "image/png"),
        (status = 404, description = "No image for this session", body = ErrorResponse),
    )
)]
pub async fn qq_qrcode(State(state): State<OAuth2State>, Path(session): Path<String>) -> Response {
    if !is_plain_token(&session) {
        return OidcError::NotFound("QR code not found".into()).into_response();
    }
    let path = HelperProcess::qr_code_path(&state.config.external_login.qr_code_dir, &session);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "QR code not available");
            OidcError::NotFound("QR code not found".into()).into_response()
        }
    }
}

/// Poll a session.
///
/// Always 200: unknown sessions report `not_found` so bursts of stale polls stay cheap.
#[utoipa::path(
    get,
    path = "/qq/status/{session}",
    tag = EXTERNAL_LOGIN_TAG,
    operation_id = "QQ Status",
    summary = "Poll external-login status",
    params(("session" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
    )
)]
pub async fn qq_status(
    State(state): State<OAuth2State>,
    Path(session): Path<String>,
) -> Json<StatusResponse> {
    let response = match state.bridge.poll_status(&session) {
        Ok(view) => StatusResponse {
            status: view.status.as_str().to_string(),
            error: view.error,
        },
        Err(_) => StatusResponse {
            status: NOT_FOUND_STATUS.to_string(),
            error: Some("session not found".to_string()),
        },
    };
    Json(response)
}

/// Helper reports progress.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    post,
    path = "/qq/callback",
    tag = EXTERNAL_LOGIN_TAG,
    operation_id = "QQ Callback",
    summary = "Report an external-login event",
    description = "Moves the session forward: `scanning`, `confirmed`, `completed` (with `qq_number` and \
                   optional `nickname`) or `failed` (with optional `error`). Backward moves and changes to \
                   a finished session are rejected; repeating the current status is accepted and ignored.",
    request_body(content = CallbackPayload, content_type = "application/json"),
    responses(
        (status = 200, description = "Event applied", body = CallbackResponse),
        (status = 400, description = "Malformed payload or invalid transition", body = ErrorResponse),
        (status = 404, description = "Unknown, expired or redeemed session", body = ErrorResponse),
    )
)]
pub async fn qq_callback(State(state): State<OAuth2State>, body: Bytes) -> Response {
    let event = match parse_callback::<CallbackPayload>(&body)
        .map_err(|e| OidcError::BadRequest(format!("Invalid callback payload: {e}")))
        .and_then(ExternalEvent::try_from)
    {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected callback payload");
            return e.into_response();
        }
    };

    match state.bridge.report_event(event) {
        Ok(_) => Json(CallbackResponse { success: true }).into_response(),
        Err(e) => e.into_response(),
    }
}

fn is_plain_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tokens_only() {
        assert!(is_plain_token("AbC-12_x"));
        assert!(!is_plain_token(""));
        assert!(!is_plain_token("../etc/passwd"));
        assert!(!is_plain_token("a.png"));
    }

    #[test]
    fn payload_maps_to_event() {
        let payload = CallbackPayload {
            session_id: "s".into(),
            status: "completed".into(),
            qq_number: Some("12345".into()),
            nickname: Some("Alice".into()),
            error: None,
        };
        let event = ExternalEvent::try_from(payload).unwrap();
        assert_eq!(
            event,
            ExternalEvent::completed("s", "12345", Some("Alice".into()))
        );
    }

    #[test]
    fn status_response_always_carries_error() {
        let body = serde_json::to_value(StatusResponse {
            status: "pending".into(),
            error: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "status": "pending", "error": null }));
    }

    #[test]
    fn unknown_status_is_bad_request() {
        let payload = CallbackPayload {
            session_id: "s".into(),
            status: "done".into(),
            qq_number: None,
            nickname: None,
            error: None,
        };
        assert!(matches!(
            ExternalEvent::try_from(payload),
            Err(OidcError::BadRequest(_))
        ));
    }
}
