use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failures surfaced by the authorization, token and external-login operations.
///
/// Every variant is terminal for the request that triggered it; nothing is retried
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OidcError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Invalid client credentials")]
    InvalidClient,
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrant(String),
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl OidcError {
    /// Stable machine-readable error code, in the OAuth2 error vocabulary where one exists.
    pub fn code(&self) -> &'static str {
        match self {
            OidcError::Unauthenticated(_) => "invalid_token",
            OidcError::InvalidClient => "invalid_client",
            OidcError::UnsupportedGrant(_) => "unsupported_grant_type",
            OidcError::InvalidGrant(_) => "invalid_grant",
            OidcError::NotFound(_) => "not_found",
            OidcError::BadRequest(_) => "invalid_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OidcError::Unauthenticated(_) | OidcError::InvalidClient => StatusCode::UNAUTHORIZED,
            OidcError::UnsupportedGrant(_)
            | OidcError::InvalidGrant(_)
            | OidcError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OidcError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn description(&self) -> Option<String> {
        match self {
            OidcError::Unauthenticated(d)
            | OidcError::UnsupportedGrant(d)
            | OidcError::InvalidGrant(d)
            | OidcError::NotFound(d)
            | OidcError::BadRequest(d) => Some(d.clone()),
            OidcError::InvalidClient => None,
        }
    }
}

/// OAuth2-style error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&OidcError> for ErrorResponse {
    fn from(err: &OidcError) -> Self {
        Self {
            error: err.code().to_string(),
            error_description: err.description(),
        }
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Failures of the out-of-process external-login helper.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start helper `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Helper exited with {0}")]
    Exit(std::process::ExitStatus),
    #[error("Helper did not finish within {0:?}")]
    TimedOut(std::time::Duration),
    #[error("Helper I/O error: {0}")]
    Io(#[from] std::io::Error),
}
