//! External (QQ) login bridge tests over HTTP.

mod common;

use axum::http::StatusCode;
use common::*;
use mock_oidc_provider::config::AppConfig;
use mock_oidc_provider::external::{ExternalEvent, LoginRequest};
use mock_oidc_provider::oauth2::model::SessionStatus;
use mock_oidc_provider::oauth2::token::TokenResponse;
use serde_json::json;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::Duration;

fn create_session(h: &Harness) -> String {
    h.state.bridge.create_session(LoginRequest {
        state: "xyz".into(),
        client_id: Some(CLIENT_ID.into()),
        redirect_uri: Some(REDIRECT_URI.into()),
    })
}

async fn poll(h: &Harness, session: &str) -> serde_json::Value {
    let response = h.server.get(&format!("/qq/status/{session}")).await;
    response.assert_status_ok();
    response.json()
}

async fn callback(h: &Harness, body: serde_json::Value) -> axum_test::TestResponse {
    h.server.post("/qq/callback").json(&body).await
}

#[tokio::test]
async fn test_scan_login_end_to_end() {
    let h = harness();
    let s1 = create_session(&h);

    callback(&h, json!({ "session_id": s1, "status": "scanning" }))
        .await
        .assert_status_ok();
    let body = poll(&h, &s1).await;
    assert_eq!(body, json!({ "status": "scanning", "error": null }));

    let response = callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "12345", "nickname": "Alice" }),
    )
    .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "success": true }));
    assert_eq!(poll(&h, &s1).await["status"], "completed");

    let response = h
        .server
        .get("/auth")
        .add_query_param("client_id", "c1")
        .add_query_param("redirect_uri", "https://rp/cb")
        .add_query_param("state", "xyz")
        .add_query_param("qq_session", &s1)
        .await;
    response.assert_status(StatusCode::FOUND);
    let location = location(&response);
    assert!(location.starts_with("https://rp/cb?code="));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));

    assert_eq!(poll(&h, &s1).await["status"], "not_found");

    // The code resolves to the synthesized external identity.
    let code = query_param(&location, "code").unwrap();
    let tokens: TokenResponse = exchange_code(&h.server, &code).await.json();
    let response = h
        .server
        .get("/userinfo")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({
        "sub": "qq_12345",
        "preferred_username": "qq_12345",
        "email": "12345@qq.com",
        "name": "Alice",
        "groups": ["all"],
    }));
}

#[tokio::test]
async fn test_qq_login_page_starts_helper() {
    let h = harness();
    let response = h
        .server
        .get("/qq/login")
        .add_query_param("state", "xyz")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .await;
    response.assert_status_ok();

    let launched = h.collaborator.launched();
    assert_eq!(launched.len(), 1);
    let session = &launched[0];

    let html = response.text();
    assert!(html.contains(&format!("/qq/status/{session}")));
    assert!(html.contains(&format!("qq_session={session}")));

    let stored = h.state.bridge.session(session).unwrap();
    assert_eq!(stored.status, SessionStatus::Pending);
    assert_eq!(stored.originating_oauth_state, "xyz");
    assert_eq!(stored.client_id.as_deref(), Some(CLIENT_ID));
}

#[tokio::test]
async fn test_redemption_falls_back_to_recorded_client() {
    let h = harness();
    let s1 = create_session(&h);
    h.state
        .bridge
        .report_event(ExternalEvent::completed(&s1, "777", None))
        .unwrap();

    let response = h
        .server
        .get("/auth")
        .add_query_param("qq_session", &s1)
        .await;
    response.assert_status(StatusCode::FOUND);
    let location = location(&response);
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));

    let code = query_param(&location, "code").unwrap();
    exchange_code(&h.server, &code).await.assert_status_ok();
}

#[tokio::test]
async fn test_incomplete_session_shows_form() {
    let h = harness();
    let s1 = create_session(&h);

    let response = h
        .server
        .get("/auth")
        .add_query_param("qq_session", &s1)
        .await;
    response.assert_status_ok();
    assert!(response.text().contains("<form"));
    assert_eq!(poll(&h, &s1).await["status"], "pending");
}

#[tokio::test]
async fn test_callback_rejects_malformed_payloads() {
    let h = harness();
    let s1 = create_session(&h);

    let response = h.server.post("/qq/callback").text("{not json").await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    callback(&h, json!({ "status": "scanning" }))
        .await
        .assert_status_bad_request();
    callback(&h, json!({ "session_id": s1, "status": "done" }))
        .await
        .assert_status_bad_request();
    callback(&h, json!({ "session_id": s1, "status": "expired" }))
        .await
        .assert_status_bad_request();
    callback(&h, json!({ "session_id": s1, "status": "completed" }))
        .await
        .assert_status_bad_request();

    assert_eq!(poll(&h, &s1).await["status"], "pending");
}

#[tokio::test]
async fn test_callback_unknown_session_is_not_found() {
    let h = harness();
    let response = callback(&h, json!({ "session_id": "nope", "status": "scanning" })).await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "not_found");

    let body = poll(&h, "nope").await;
    assert_eq!(body["status"], "not_found");
}

#[tokio::test]
async fn test_state_machine_is_forward_only() {
    let h = harness();
    let s1 = create_session(&h);

    callback(&h, json!({ "session_id": s1, "status": "confirmed" }))
        .await
        .assert_status_ok();
    callback(&h, json!({ "session_id": s1, "status": "scanning" }))
        .await
        .assert_status_bad_request();
    callback(&h, json!({ "session_id": s1, "status": "confirmed" }))
        .await
        .assert_status_ok();
    assert_eq!(poll(&h, &s1).await["status"], "confirmed");

    callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "1" }),
    )
    .await
    .assert_status_ok();
    callback(&h, json!({ "session_id": s1, "status": "failed", "error": "late" }))
        .await
        .assert_status_bad_request();
    assert_eq!(poll(&h, &s1).await["status"], "completed");
}

#[tokio::test]
async fn test_events_after_redemption_are_not_found() {
    let h = harness();
    let s1 = create_session(&h);
    callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "1" }),
    )
    .await
    .assert_status_ok();
    assert!(h.state.bridge.redeem(&s1).is_some());

    callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "1" }),
    )
    .await
    .assert_status_not_found();
}

#[tokio::test]
async fn test_failed_session_reports_error() {
    let h = harness();
    let s1 = create_session(&h);
    callback(
        &h,
        json!({ "session_id": s1, "status": "failed", "error": "user cancelled" }),
    )
    .await
    .assert_status_ok();

    let body = poll(&h, &s1).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "user cancelled");
}

#[tokio::test]
async fn test_session_expires_after_ttl() {
    let h = harness();
    let s1 = create_session(&h);
    callback(&h, json!({ "session_id": s1, "status": "scanning" }))
        .await
        .assert_status_ok();

    h.clock.advance(Duration::minutes(6));

    let body = poll(&h, &s1).await;
    assert_eq!(body["status"], "expired");

    callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "1" }),
    )
    .await
    .assert_status_not_found();

    // Still pollable during retention, gone after the sweep.
    h.clock.advance(Duration::minutes(10));
    h.state.sweep().await;
    assert_eq!(poll(&h, &s1).await["status"], "not_found");
}

#[tokio::test]
async fn test_completed_session_expires_for_pollers() {
    let h = harness();
    let s1 = create_session(&h);
    h.clock.advance(Duration::minutes(4));
    callback(
        &h,
        json!({ "session_id": s1, "status": "completed", "qq_number": "12345" }),
    )
    .await
    .assert_status_ok();
    assert_eq!(poll(&h, &s1).await["status"], "completed");

    h.clock.advance(Duration::minutes(2));

    let body = poll(&h, &s1).await;
    assert_eq!(body["status"], "expired");
    assert_eq!(body["error"], "session expired");

    // The polling page would not continue; a direct attempt gets the form, not a code.
    let response = h
        .server
        .get("/auth")
        .add_query_param("qq_session", &s1)
        .await;
    response.assert_status_ok();
    assert!(response.text().contains("<form"));
}

#[tokio::test]
async fn test_helper_failure_marks_session_failed() {
    let h = harness_with(
        AppConfig::default(),
        RecordingCollaborator::failing("helper crashed"),
    );
    let s1 = create_session(&h);

    let mut status = String::new();
    for _ in 0..50 {
        status = poll(&h, &s1).await["status"].as_str().unwrap().to_string();
        if status == "failed" {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(status, "failed");
    let body = poll(&h, &s1).await;
    assert!(body["error"].as_str().unwrap().contains("helper crashed"));
}

#[tokio::test]
async fn test_qrcode_served_from_configured_dir() {
    let dir = std::env::temp_dir().join(format!("mock-oidc-qr-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut config = AppConfig::default();
    config.external_login.qr_code_dir = dir.clone();
    let h = harness_with(config, RecordingCollaborator::default());
    let s1 = create_session(&h);

    h.server
        .get(&format!("/qq/qrcode/{s1}"))
        .await
        .assert_status_not_found();

    let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    std::fs::write(dir.join(format!("{s1}.png")), png).unwrap();

    let response = h.server.get(&format!("/qq/qrcode/{s1}")).await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/png"
    );
    assert_eq!(response.as_bytes().as_ref(), &png);

    h.server
        .get("/qq/qrcode/..%2Fsecret")
        .await
        .assert_status_not_found();

    std::fs::remove_dir_all(&dir).ok();
}

fn harness_with_qr_dir(name: &str) -> (Harness, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("mock-oidc-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut config = AppConfig::default();
    config.external_login.qr_code_dir = dir.clone();
    (harness_with(config, RecordingCollaborator::default()), dir)
}

#[tokio::test]
async fn test_qrcode_removed_on_redemption() {
    let (h, dir) = harness_with_qr_dir("qr-redeem");
    let s1 = create_session(&h);
    let png = dir.join(format!("{s1}.png"));
    std::fs::write(&png, b"png").unwrap();

    h.state
        .bridge
        .report_event(ExternalEvent::completed(&s1, "12345", None))
        .unwrap();
    let response = h
        .server
        .get("/auth")
        .add_query_param("qq_session", &s1)
        .await;
    response.assert_status(StatusCode::FOUND);

    assert!(!png.exists());
    h.server
        .get(&format!("/qq/qrcode/{s1}"))
        .await
        .assert_status_not_found();

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_qrcode_removed_when_session_is_swept() {
    let (h, dir) = harness_with_qr_dir("qr-sweep");
    let s1 = create_session(&h);
    let s2 = create_session(&h);
    let stale = dir.join(format!("{s1}.png"));
    std::fs::write(&stale, b"png").unwrap();

    // Retention keeps the image around as long as the session is pollable.
    h.clock.advance(Duration::minutes(6));
    let stats = h.state.sweep().await;
    assert!(stats.sessions.is_empty());
    assert!(stale.exists());

    h.clock.advance(Duration::minutes(5));
    let fresh = create_session(&h);
    let kept = dir.join(format!("{fresh}.png"));
    std::fs::write(&kept, b"png").unwrap();

    let mut swept = h.state.sweep().await.sessions;
    swept.sort();
    let mut expected = vec![s1, s2];
    expected.sort();
    assert_eq!(swept, expected);
    assert!(!stale.exists());
    assert!(kept.exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_concurrent_http_redemption_mints_one_code() {
    let h = harness();
    let s1 = create_session(&h);
    h.state
        .bridge
        .report_event(ExternalEvent::completed(&s1, "12345", Some("Alice".into())))
        .unwrap();

    let requests = (0..32).map(|_| {
        h.server
            .get("/auth")
            .add_query_param("client_id", CLIENT_ID)
            .add_query_param("redirect_uri", REDIRECT_URI)
            .add_query_param("qq_session", &s1)
            .into_future()
    });
    let statuses: Vec<StatusCode> = futures::future::join_all(requests)
        .await
        .iter()
        .map(|r| r.status_code())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::FOUND).count(), 1);
    assert!(
        statuses
            .iter()
            .all(|s| *s == StatusCode::FOUND || *s == StatusCode::OK)
    );
    assert_eq!(h.state.store.counts().codes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_redemption_mints_one_code() {
    use mock_oidc_provider::oauth2::authorize::{
        AuthorizationRequest, AuthorizeOutcome, begin_authorization,
    };

    let h = harness();
    for round in 0..20 {
        let session = create_session(&h);
        h.state
            .bridge
            .report_event(ExternalEvent::completed(&session, round.to_string(), None))
            .unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = h.state.clone();
            let barrier = barrier.clone();
            let request = AuthorizationRequest {
                client_id: CLIENT_ID.into(),
                redirect_uri: REDIRECT_URI.into(),
                state: "xyz".into(),
                external_session_id: Some(session.clone()),
            };
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                begin_authorization(&state, &request)
            }));
        }

        let mut redirects = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(AuthorizeOutcome::Redirect(_)) => redirects += 1,
                Ok(AuthorizeOutcome::Interactive) => {}
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(redirects, 1, "round {round}");
    }
    assert_eq!(h.state.store.counts().codes, 20);
}
