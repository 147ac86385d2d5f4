//! Mock OpenID Connect provider.
//!
//! Implements the authorization code flow for a single relying party, with local
//! pre-provisioned users and an external QQ scan login (see [`crate::external`]).
//! Tokens are opaque random strings; nothing is signed.
//!
//! ## Endpoints
//!
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `GET /auth` - Authorization endpoint
//! - `POST /auth` - Local login submission
//! - `POST /token` - Token endpoint
//! - `GET /userinfo` - OpenID Connect UserInfo
//! - `GET /jwks` - Key set (empty)

pub mod authorize;
pub mod endpoints;
pub mod identity;
pub mod login;
pub mod model;
pub mod state;
pub mod token;

pub use endpoints::router;
pub use identity::UserDirectory;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
