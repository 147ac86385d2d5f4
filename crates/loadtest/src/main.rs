use goose::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

static POLL_COUNTER: AtomicU64 = AtomicU64::new(0);

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/healthz").await?;
    Ok(())
}

async fn discovery(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/.well-known/openid-configuration").await?;
    Ok(())
}

async fn jwks(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/jwks").await?;
    Ok(())
}

/// Browsers keep polling long after a session is gone; those polls must stay cheap 200s.
async fn poll_unknown_session(user: &mut GooseUser) -> TransactionResult {
    let n = POLL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = format!("/qq/status/loadtest-{}", n % 64);
    let mut goose = user.get(&path).await?;

    if let Ok(response) = goose.response {
        let body = response.text().await.unwrap_or_default();
        let status = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string));
        if status.as_deref() != Some("not_found") {
            return user.set_failure(
                "unexpected status for unknown session",
                &mut goose.request,
                None,
                Some(&body),
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("HealthCheck").register_transaction(transaction!(health_check)),
        )
        .register_scenario(
            scenario!("Discovery")
                .register_transaction(transaction!(discovery))
                .register_transaction(transaction!(jwks)),
        )
        .register_scenario(
            scenario!("StalePolling")
                .set_weight(4)?
                .register_transaction(transaction!(poll_unknown_session)),
        )
        .execute()
        .await?;

    Ok(())
}
