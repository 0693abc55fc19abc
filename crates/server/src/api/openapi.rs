//! OpenAPI/Utoipa configuration.

use crate::api::{auth::AUTH_TAG, health::MISC_TAG};
use utoipa::OpenApi;

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Federated Auth API",
        version = "1.0.0",
        description = "Federated login through OpenID Connect providers, token refresh and one-time code redemption."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = AUTH_TAG, description = "Login flow and token endpoints")
    )
)]
pub struct ApiDoc;
