use mock_oidc_provider::api::start_webserver;
use mock_oidc_provider::config::load_config_or_panic;
use mock_oidc_provider::oauth2::OAuth2State;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "mock_oidc_provider=info,hyper=warn,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    dotenvy::dotenv().ok();

    initialize_tracing();

    let config = Arc::new(load_config_or_panic());
    tracing::info!(
        issuer = config.issuer(),
        listen_addr = %config.listen_addr,
        users = config.users.len(),
        helper = config.external_login.helper.as_ref().map(|h| h.program.as_str()).unwrap_or("none"),
        "configuration loaded"
    );

    let state = OAuth2State::from_config(config);
    state.spawn_sweeper();

    start_webserver(state).await?;
    Ok(())
}
