//! Login, second-factor verification, logout, and the current-user lookup.
//!
//! All endpoints run against the context database resolved from the Host
//! header, so the same routes serve both the central application and every
//! tenant workspace. Unknown email and wrong password collapse into one
//! generic 401; the active flag is only reported after the password
//! matched.

pub mod principal;
pub mod storage;
pub mod types;
pub mod utils;

use axum::{Extension, http::HeaderMap, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::info;

use crate::api::{
    AppState,
    envelope::{ApiError, RequestStart, success},
};
use crate::tenancy::RequestContext;
use storage::CredentialRecord;
use types::{LoginRequest, LoginSuccess, TwoFactorChallenge, Verify2faRequest};

/// Outcome of the credential check, before any session exists.
#[derive(Debug, Eq, PartialEq)]
enum LoginOutcome {
    /// Credentials accepted, no second factor configured.
    Session { user_id: i64 },
    /// Credentials accepted, a confirmed second factor must be verified.
    TwoFactor { user_id: i64 },
}

/// Pure credential decision. Password verification happens before the
/// active check so a deactivated account is only revealed to someone who
/// holds the password.
fn login_decision(
    record: Option<CredentialRecord>,
    password: &str,
) -> Result<LoginOutcome, ApiError> {
    let record = record.ok_or(ApiError::InvalidCredentials)?;
    if !utils::verify_password(password, &record.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    if !record.is_active {
        return Err(ApiError::AccountDeactivated);
    }
    if record.two_factor_confirmed {
        return Ok(LoginOutcome::TwoFactor { user_id: record.id });
    }
    Ok(LoginOutcome::Session { user_id: record.id })
}

/// Pure second-factor decision. Holding the user id and a live code is the
/// whole proof; no password exchange or pending-login state feeds this
/// path. Yields the encrypted secret for the code check.
fn verify_decision(record: Option<storage::TwoFactorRecord>) -> Result<Vec<u8>, ApiError> {
    let record = record.ok_or(ApiError::InvalidCredentials)?;
    if !record.is_active {
        return Err(ApiError::AccountDeactivated);
    }
    let (Some(encrypted), Some(_)) = (record.secret, record.confirmed_at) else {
        return Err(ApiError::TwoFactorNotEnabled);
    };
    Ok(encrypted)
}

async fn issue_session(
    context: &RequestContext,
    start: RequestStart,
    user_id: i64,
    message: &str,
) -> Result<axum::response::Response, ApiError> {
    let token = storage::insert_session(&context.pool, user_id, None).await?;
    let user = storage::load_user(&context.pool, context.guard, user_id)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    info!(user_id, guard = context.guard.as_str(), "session issued");
    Ok(success(
        start,
        StatusCode::OK,
        message,
        LoginSuccess {
            user,
            token,
            context: context.guard.as_str(),
        },
    ))
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued or second factor required"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account deactivated")
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    axum::Json(request): axum::Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = utils::normalize_email(&request.email);
    if !utils::valid_email(&email) {
        return Err(ApiError::Validation(
            "The email must be a valid email address.".to_string(),
        ));
    }
    if request.password.is_empty() {
        return Err(ApiError::Validation(
            "The password field is required.".to_string(),
        ));
    }
    let record = storage::lookup_credentials(&context.pool, &email).await?;

    match login_decision(record, &request.password)? {
        LoginOutcome::TwoFactor { user_id } => Ok(success(
            start,
            StatusCode::OK,
            "Two-factor authentication required.",
            TwoFactorChallenge::for_user(user_id),
        )),
        LoginOutcome::Session { user_id } => {
            issue_session(&context, start, user_id, "Login successful.").await
        }
    }
}

#[utoipa::path(
    post,
    path = "/login/verify-2fa",
    request_body = Verify2faRequest,
    responses(
        (status = 200, description = "Session issued"),
        (status = 400, description = "Two-factor not enabled"),
        (status = 401, description = "Invalid code"),
        (status = 403, description = "Account deactivated")
    ),
    tag = "auth"
)]
pub async fn verify_2fa(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    axum::Json(request): axum::Json<Verify2faRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = storage::lookup_two_factor(&context.pool, request.user_id).await?;
    let encrypted = verify_decision(record)?;

    // Decrypt failure means the row was tampered with or copied between
    // contexts; never report it as a bad code.
    let secret = state
        .totp
        .decrypt(&encrypted, &context.scope(), request.user_id)
        .map_err(|_| ApiError::SecurityError)?;

    if !state.totp.check(&secret, &request.code)? {
        return Err(ApiError::InvalidCode);
    }

    issue_session(&context, start, request.user_id, "Login successful.").await
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = utils::extract_bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    // Unknown token still logs out cleanly; revocation is idempotent.
    storage::delete_session(&context.pool, &token).await?;
    Ok(success(
        start,
        StatusCode::OK,
        "Logged out successfully.",
        serde_json::json!(null),
    ))
}

#[utoipa::path(
    get,
    path = "/user",
    responses(
        (status = 200, description = "Current user", body = types::UserPayload),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    let user = storage::load_user(&context.pool, caller.guard, caller.user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(success(start, StatusCode::OK, "OK", user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(active: bool, two_factor: bool) -> CredentialRecord {
        CredentialRecord {
            id: 7,
            password_hash: utils::hash_password("hunter2").expect("hash"),
            is_active: active,
            two_factor_confirmed: two_factor,
        }
    }

    #[test]
    fn unknown_email_and_wrong_password_are_indistinguishable() {
        let unknown = login_decision(None, "hunter2").expect_err("deny");
        let wrong = login_decision(Some(record(true, false)), "wrong").expect_err("deny");
        assert!(matches!(unknown, ApiError::InvalidCredentials));
        assert!(matches!(wrong, ApiError::InvalidCredentials));
    }

    #[test]
    fn deactivated_account_needs_the_right_password_to_learn_it() {
        let wrong = login_decision(Some(record(false, false)), "wrong").expect_err("deny");
        assert!(matches!(wrong, ApiError::InvalidCredentials));

        let right = login_decision(Some(record(false, false)), "hunter2").expect_err("deny");
        assert!(matches!(right, ApiError::AccountDeactivated));
    }

    #[test]
    fn confirmed_second_factor_defers_the_session() {
        let outcome = login_decision(Some(record(true, true)), "hunter2").expect("accept");
        assert_eq!(outcome, LoginOutcome::TwoFactor { user_id: 7 });
    }

    #[test]
    fn plain_login_issues_session() {
        let outcome = login_decision(Some(record(true, false)), "hunter2").expect("accept");
        assert_eq!(outcome, LoginOutcome::Session { user_id: 7 });
    }

    fn two_factor_record(
        active: bool,
        secret: Option<Vec<u8>>,
        confirmed: bool,
    ) -> storage::TwoFactorRecord {
        storage::TwoFactorRecord {
            email: "bee@example.com".to_string(),
            is_active: active,
            secret,
            confirmed_at: confirmed.then(chrono::Utc::now),
        }
    }

    #[test]
    fn second_factor_alone_completes_the_challenge() {
        // Nothing here came from a login: just the stored record and a
        // code from the authenticator. That pair must be sufficient.
        let engine = crate::totp::TotpEngine::new("test-master-key", "Hive".to_string());
        let (secret, _) = engine.generate_secret().expect("secret");
        let stored = engine.encrypt(&secret, "central", 7).expect("encrypt");

        let encrypted =
            verify_decision(Some(two_factor_record(true, Some(stored), true))).expect("open");
        let recovered = engine.decrypt(&encrypted, "central", 7).expect("decrypt");

        let totp = totp_rs::TOTP::new(
            totp_rs::Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("Hive".to_string()),
            "user".to_string(),
        )
        .expect("totp");
        let code = totp.generate_current().expect("code");
        assert!(engine.check(&recovered, &code).expect("check"));
    }

    #[test]
    fn unconfirmed_secret_cannot_pass_the_second_factor() {
        let denied =
            verify_decision(Some(two_factor_record(true, Some(vec![1, 2, 3]), false)))
                .expect_err("deny");
        assert!(matches!(denied, ApiError::TwoFactorNotEnabled));

        let denied = verify_decision(Some(two_factor_record(true, None, true))).expect_err("deny");
        assert!(matches!(denied, ApiError::TwoFactorNotEnabled));
    }

    #[test]
    fn second_factor_respects_the_active_flag() {
        let denied =
            verify_decision(Some(two_factor_record(false, Some(vec![1, 2, 3]), true)))
                .expect_err("deny");
        assert!(matches!(denied, ApiError::AccountDeactivated));

        let denied = verify_decision(None).expect_err("deny");
        assert!(matches!(denied, ApiError::InvalidCredentials));
    }

    #[test]
    fn challenge_exposes_only_the_user_id() {
        // The second-factor step authenticates with user_id + code alone;
        // the challenge hands the client exactly that user_id and nothing
        // tying it to the password exchange.
        let challenge = TwoFactorChallenge::for_user(7);
        let body = serde_json::to_value(&challenge).expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({ "requires_2fa": true, "user_id": 7 })
        );
    }
}
