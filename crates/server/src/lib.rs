//! An OpenID Connect identity provider emulator.
//!
//! Serves the authorization code flow to a single relying party, authenticating users
//! either from a table of local test accounts or through an external QQ scan login that
//! is driven by an out-of-process helper and bridged back into the redirect flow.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod external;
pub mod oauth2;
pub mod security;
pub mod store;
