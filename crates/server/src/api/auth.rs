//! Login, callback, refresh and code redemption endpoints.

use crate::api::error::{ApiError, ErrorBody, RequestMeta};
use crate::otc::TokenPair;
use crate::service::{AuthCallbackRequest, AuthService, LoginRequest};
use crate::session::HttpEnv;
use crate::utils::{is_local_redirect, normalize_provider};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const AUTH_TAG: &str = "Authentication";

#[derive(Clone)]
pub struct AuthAppState {
    pub service: Arc<AuthService>,
}

pub(crate) fn router(state: AuthAppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(callback))
        .routes(routes!(refresh))
        .routes(routes!(redeem_code))
        .with_state(state)
}

/// 302 Found to `location`.
fn found(location: String) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LoginParams {
    /// Where the browser is sent once login completes. The one-time code is appended as `otc`.
    #[serde(default)]
    pub redirect_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    /// Authorization code issued by the provider
    #[serde(default)]
    pub code: String,
    /// State echoed back by the provider
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub code: String,
}

#[utoipa::path(
    get,
    path = "/{provider}/login",
    tag = AUTH_TAG,
    operation_id = "Start Login",
    params(
        ("provider" = String, Path, description = "Identity provider name, e.g. `google`"),
        LoginParams
    ),
    responses(
        (status = 302, description = "Redirect to the provider's authorization page"),
        (status = 400, description = "Missing or non-local redirect_url", body = ErrorBody),
        (status = 404, description = "Unknown provider", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
#[tracing::instrument(skip_all)]
async fn login(
    State(state): State<AuthAppState>,
    meta: RequestMeta,
    Path(provider): Path<String>,
    Query(params): Query<LoginParams>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let provider = normalize_provider(&provider);
    if !is_local_redirect(&params.redirect_url) {
        return Err(meta.bad_request(
            format!("redirect_url {:?} is not a local path", params.redirect_url),
            "invalid redirect url",
        ));
    }

    let mut env = HttpEnv::new(&provider, jar);
    let url = state
        .service
        .login_url(
            &mut env,
            LoginRequest {
                provider,
                redirect_url: params.redirect_url,
            },
        )
        .map_err(|e| meta.fail(e))?;

    Ok((env.into_jar(), found(url)).into_response())
}

#[utoipa::path(
    get,
    path = "/{provider}/callback",
    tag = AUTH_TAG,
    operation_id = "Login Callback",
    params(
        ("provider" = String, Path, description = "Identity provider name"),
        CallbackParams
    ),
    responses(
        (status = 302, description = "Redirect to the caller's redirect_url with `otc` appended"),
        (status = 401, description = "State, nonce or code rejected", body = ErrorBody),
        (status = 404, description = "Unknown provider", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
#[tracing::instrument(skip_all)]
async fn callback(
    State(state): State<AuthAppState>,
    meta: RequestMeta,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let provider = normalize_provider(&provider);
    let env = HttpEnv::new(&provider, jar);

    let resp = state
        .service
        .auth_callback(
            &env,
            AuthCallbackRequest {
                provider,
                code: params.code,
                state: params.state,
            },
        )
        .await
        .map_err(|e| meta.fail(e))?;

    Ok(found(resp.redirect_url).into_response())
}

#[utoipa::path(
    post,
    path = "/refresh",
    tag = AUTH_TAG,
    operation_id = "Refresh Access Token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 401, description = "Invalid refresh token", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
#[tracing::instrument(skip_all)]
async fn refresh(
    State(state): State<AuthAppState>,
    meta: RequestMeta,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let Json(req) = body.map_err(|e| meta.bad_request(e, "invalid request json"))?;

    let access_token = state
        .service
        .refresh(&req.refresh_token)
        .await
        .map_err(|e| meta.fail(e))?;

    Ok(Json(RefreshResponse { access_token }))
}

#[utoipa::path(
    post,
    path = "/internal/redeem",
    tag = AUTH_TAG,
    operation_id = "Redeem One-Time Code",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Token pair the code stood for", body = TokenPair),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 500, description = "Unknown, expired or already redeemed code", body = ErrorBody)
    )
)]
#[tracing::instrument(skip_all)]
async fn redeem_code(
    State(state): State<AuthAppState>,
    meta: RequestMeta,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let Json(req) = body.map_err(|e| meta.bad_request(e, "invalid request json"))?;

    let pair = state
        .service
        .redeem_code(&req.code)
        .await
        .map_err(|e| meta.fail(e))?;

    Ok(Json(pair))
}
