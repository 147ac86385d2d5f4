//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::external::EXTERNAL_LOGIN_TAG;
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some(
                    "Opaque access token obtained from the `/token` endpoint.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::AuthorizationCode(
                utoipa::openapi::security::AuthorizationCode::new(
                    "/auth",
                    "/token",
                    Scopes::from_iter([
                        ("openid", "OpenID Connect scope"),
                        ("email", "Access to user email"),
                        ("profile", "Access to user profile"),
                        ("groups", "Group memberships"),
                    ]),
                ),
            )]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Mock OIDC Provider API",
        version = "0.1.0",
        description = "OpenID Connect identity provider emulator with local test users and QQ scan login."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 / OpenID Connect endpoints"),
        (name = EXTERNAL_LOGIN_TAG, description = "QQ scan login bridge")
    )
)]
pub struct ApiDoc;
