//! Second-factor enrollment for the authenticated user.
//!
//! Enrollment is two-step: `enable` stores a fresh encrypted secret and
//! returns it once (base32 plus otpauth URL), `confirm` proves possession
//! with a live code before the factor becomes part of login. An
//! unconfirmed secret never blocks a password login.

use axum::{Extension, http::HeaderMap, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::auth::{principal, storage};
use crate::api::{
    AppState,
    envelope::{ApiError, RequestStart, success},
};
use crate::tenancy::RequestContext;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ConfirmRequest {
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/two-factor/enable",
    responses(
        (status = 200, description = "Secret generated, shown once"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn enable(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    let record = storage::lookup_two_factor(&context.pool, caller.user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let (secret, encoded) = state.totp.generate_secret().map_err(ApiError::Internal)?;
    let url = state
        .totp
        .otpauth_url(&secret, &record.email)
        .map_err(ApiError::Internal)?;
    let encrypted = state
        .totp
        .encrypt(&secret, &context.scope(), caller.user_id)
        .map_err(ApiError::Internal)?;

    // Re-enabling replaces the secret and drops any previous confirmation.
    storage::store_two_factor_secret(&context.pool, caller.user_id, &encrypted).await?;

    info!(user_id = caller.user_id, "two-factor secret generated");
    Ok(success(
        start,
        StatusCode::OK,
        "Scan the QR code with your authenticator app, then confirm with a code.",
        json!({
            "secret": encoded,
            "otpauth_url": url,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/two-factor/confirm",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Second factor confirmed"),
        (status = 400, description = "No pending secret"),
        (status = 401, description = "Invalid code")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn confirm(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    let record = storage::lookup_two_factor(&context.pool, caller.user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let Some(encrypted) = record.secret else {
        return Err(ApiError::TwoFactorNotEnabled);
    };
    let secret = state
        .totp
        .decrypt(&encrypted, &context.scope(), caller.user_id)
        .map_err(|_| ApiError::SecurityError)?;

    if !state.totp.check(&secret, &request.code)? {
        return Err(ApiError::InvalidCode);
    }

    storage::confirm_two_factor(&context.pool, caller.user_id).await?;
    info!(user_id = caller.user_id, "two-factor confirmed");
    Ok(success(
        start,
        StatusCode::OK,
        "Two-factor authentication enabled.",
        json!(null),
    ))
}

#[utoipa::path(
    delete,
    path = "/two-factor/disable",
    responses(
        (status = 200, description = "Second factor removed"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn disable(
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    storage::clear_two_factor(&context.pool, caller.user_id).await?;
    info!(user_id = caller.user_id, "two-factor disabled");
    Ok(success(
        start,
        StatusCode::OK,
        "Two-factor authentication disabled.",
        json!(null),
    ))
}
