use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Upper bound for every lifetime and interval setting: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// The single relying party this provider serves.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// Shown on the home page; codes are bound to whatever client id the request carries.
    #[serde(default = "default_client_id")]
    pub id: String,
    #[serde(default = "default_client_secret")]
    pub secret: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            secret: default_client_secret(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_code_ttl")]
    pub authorization_code_ttl_secs: u64,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: u64,
}

impl TokenConfig {
    pub fn authorization_code_ttl(&self) -> time::Duration {
        seconds(self.authorization_code_ttl_secs)
    }

    pub fn access_token_ttl(&self) -> time::Duration {
        seconds(self.access_token_ttl_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_ttl_secs: default_code_ttl(),
            access_token_ttl_secs: default_access_token_ttl(),
        }
    }
}

/// Out-of-process helper that drives the QR scan for one session.
#[derive(Clone, Debug, Deserialize)]
pub struct HelperConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Where the helper posts status events, handed over as `OIDC_CALLBACK_URL`.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExternalLoginConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// How long an expired session stays pollable as `expired` before it is swept.
    #[serde(default = "default_expired_retention")]
    pub expired_retention_secs: u64,
    #[serde(default = "default_groups")]
    pub default_groups: Vec<String>,
    #[serde(default = "default_qr_code_dir")]
    pub qr_code_dir: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Without a helper, events must be posted to the callback by hand.
    pub helper: Option<HelperConfig>,
}

impl ExternalLoginConfig {
    pub fn session_ttl(&self) -> time::Duration {
        seconds(self.session_ttl_secs)
    }

    pub fn expired_retention(&self) -> time::Duration {
        seconds(self.expired_retention_secs)
    }
}

impl Default for ExternalLoginConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            expired_retention_secs: default_expired_retention(),
            default_groups: default_groups(),
            qr_code_dir: default_qr_code_dir(),
            poll_interval_ms: default_poll_interval(),
            helper: None,
        }
    }
}

/// A pre-provisioned local account.
#[derive(Clone, Debug, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub external_login: ExternalLoginConfig,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_users")]
    pub users: Vec<UserConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            issuer_url: default_issuer_url(),
            client: ClientConfig::default(),
            tokens: TokenConfig::default(),
            external_login: ExternalLoginConfig::default(),
            sweep_interval_secs: default_sweep_interval(),
            users: default_users(),
        }
    }
}

impl AppConfig {
    /// Issuer URL without a trailing slash, for building endpoint URLs.
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.secret.is_empty() {
            return Err(ConfigError::Validation(
                "client.secret must not be empty".into(),
            ));
        }
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Validation(format!(
                "listen_addr `{}` is not a socket address: {e}",
                self.listen_addr
            ))
        })?;
        for (name, value) in [
            (
                "tokens.authorization_code_ttl_secs",
                self.tokens.authorization_code_ttl_secs,
            ),
            ("tokens.access_token_ttl_secs", self.tokens.access_token_ttl_secs),
            (
                "external_login.session_ttl_secs",
                self.external_login.session_ttl_secs,
            ),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
            if value > MAX_TTL_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} must be at most {MAX_TTL_SECS}"
                )));
            }
        }
        if self.external_login.expired_retention_secs > MAX_TTL_SECS {
            return Err(ConfigError::Validation(format!(
                "external_login.expired_retention_secs must be at most {MAX_TTL_SECS}"
            )));
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "users[].username must not be empty".into(),
                ));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate user `{}`",
                    user.username
                )));
            }
        }
        Ok(())
    }
}

/// Whole seconds as a signed duration, saturating at [`MAX_TTL_SECS`].
fn seconds(secs: u64) -> time::Duration {
    i64::try_from(secs.min(MAX_TTL_SECS)).map_or(time::Duration::ZERO, time::Duration::seconds)
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_issuer_url() -> String {
    "https://localhost:8080".into()
}

fn default_client_id() -> String {
    "anylink".into()
}

fn default_client_secret() -> String {
    "secret".into()
}

fn default_code_ttl() -> u64 {
    600
}

fn default_access_token_ttl() -> u64 {
    3600
}

fn default_session_ttl() -> u64 {
    300
}

fn default_expired_retention() -> u64 {
    300
}

fn default_groups() -> Vec<String> {
    vec!["all".into()]
}

fn default_qr_code_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_callback_url() -> String {
    "http://localhost:8080/qq/callback".into()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_users() -> Vec<UserConfig> {
    vec![
        UserConfig {
            username: "admin".into(),
            email: "admin@test.com".into(),
            name: "Administrator".into(),
            groups: vec!["ops".into(), "all".into()],
        },
        UserConfig {
            username: "user1".into(),
            email: "user1@test.com".into(),
            name: "Test User 1".into(),
            groups: vec!["all".into()],
        },
    ]
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// The file is optional; every key has a default. Any environment variable matching a key
/// path separated by double underscores (e.g. `TOKENS__ACCESS_TOKEN_TTL_SECS`) overrides
/// the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config.yaml")
}

/// Like [`load_config`] but reads the given file path.
pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::default()
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("external_login.default_groups")
                .try_parsing(true),
        )
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
