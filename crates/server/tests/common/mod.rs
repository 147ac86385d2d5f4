//! Shared harness for the HTTP tests.

#![allow(dead_code)]

use axum_test::TestServer;
use mock_oidc_provider::{
    api::build_router,
    clock::ManualClock,
    config::AppConfig,
    error::LaunchError,
    external::{Collaborator, LaunchTask},
    oauth2::OAuth2State,
    store::MemoryStore,
};
use std::sync::{Arc, Mutex};

pub const CLIENT_ID: &str = "c1";
pub const CLIENT_SECRET: &str = "secret";
pub const REDIRECT_URI: &str = "https://rp/cb";

/// Collaborator that only records which sessions it was asked to start.
#[derive(Default)]
pub struct RecordingCollaborator {
    launched: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl RecordingCollaborator {
    pub fn failing(message: &str) -> Self {
        Self {
            launched: Mutex::default(),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

impl Collaborator for RecordingCollaborator {
    fn launch(&self, session_id: &str) -> LaunchTask {
        self.launched.lock().unwrap().push(session_id.to_string());
        let fail_with = self.fail_with.clone();
        Box::pin(async move {
            match fail_with {
                Some(message) => Err(LaunchError::Io(std::io::Error::other(message))),
                None => Ok(()),
            }
        })
    }
}

pub struct Harness {
    pub server: TestServer,
    pub state: OAuth2State,
    pub clock: Arc<ManualClock>,
    pub collaborator: Arc<RecordingCollaborator>,
}

pub fn harness() -> Harness {
    harness_with(AppConfig::default(), RecordingCollaborator::default())
}

pub fn harness_with(config: AppConfig, collaborator: RecordingCollaborator) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let collaborator = Arc::new(collaborator);
    let state = OAuth2State::new(
        Arc::new(config),
        Arc::new(MemoryStore::new()),
        clock.clone(),
        collaborator.clone(),
    );
    let server = TestServer::new(build_router(state.clone())).expect("create test server");
    Harness {
        server,
        state,
        clock,
        collaborator,
    }
}

/// Value of `name` in the query string of `location`.
pub fn query_param(location: &str, name: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn bearer(token: &str) -> axum::http::HeaderValue {
    axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

pub fn location(response: &axum_test::TestResponse) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Logs `username` in locally and returns the authorization code.
pub async fn local_login(server: &TestServer, username: &str) -> String {
    let response = server
        .post("/auth")
        .form(&[
            ("username", username),
            ("password", "pw"),
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("state", "xyz"),
        ])
        .await;
    response.assert_status(axum::http::StatusCode::FOUND);
    query_param(&location(&response), "code").expect("code in redirect")
}

pub async fn exchange_code(server: &TestServer, code: &str) -> axum_test::TestResponse {
    server
        .post("/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await
}
