//! Response envelope and the API error taxonomy.
//!
//! Success bodies are `{meta:{latency_ms,node_id}, status:"success",
//! message, data}`; failures are `{status:"error", message}` with the HTTP
//! status carrying the failure kind. Business-rule failures never leak
//! internals: credential mismatches collapse to one generic message, and
//! integrity faults surface as a bare 500.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::{
    sync::OnceLock,
    time::Instant,
};
use tracing::error;

/// Request entry timestamp, attached by the context resolver middleware.
#[derive(Clone, Copy, Debug)]
pub struct RequestStart(pub Instant);

impl RequestStart {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn latency_ms(self) -> f64 {
        // Two-decimal milliseconds, enough for a dashboard readout.
        (self.0.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
    }
}

fn node_id() -> &'static str {
    static NODE_ID: OnceLock<String> = OnceLock::new();
    NODE_ID.get_or_init(|| std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()))
}

/// Render a success envelope.
pub fn success<T: Serialize>(
    start: RequestStart,
    status: StatusCode,
    message: &str,
    data: T,
) -> Response {
    let body = json!({
        "meta": {
            "latency_ms": start.latency_ms(),
            "node_id": node_id(),
        },
        "status": "success",
        "message": message,
        "data": data,
    });
    (status, Json(body)).into_response()
}

/// Failure taxonomy for the whole API surface.
#[derive(Debug)]
pub enum ApiError {
    /// 401, deliberately silent about which half of the pair was wrong.
    InvalidCredentials,
    /// 403, account exists and matched but is switched off.
    AccountDeactivated,
    /// 400, second-factor endpoint hit for an account without a confirmed secret.
    TwoFactorNotEnabled,
    /// 500, stored secret failed to decrypt; integrity fault, not a user error.
    SecurityError,
    /// 401, wrong time-based code.
    InvalidCode,
    /// 401, missing or unknown bearer token.
    Unauthorized,
    /// 403, governance or permission denial.
    Forbidden(String),
    /// 404, unknown entity.
    NotFound(String),
    /// 404, host resolved to no workspace; names the attempted subdomain.
    WorkspaceNotFound(String),
    /// 422, field-level input error.
    Validation(String),
    /// 500, anything unexpected; logged, never echoed.
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::InvalidCode | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountDeactivated | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TwoFactorNotEnabled => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::WorkspaceNotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SecurityError | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid credentials.".to_string(),
            Self::AccountDeactivated => "This account has been deactivated.".to_string(),
            Self::TwoFactorNotEnabled => {
                "Two-factor authentication is not enabled for this account.".to_string()
            }
            Self::SecurityError => "Security error: invalid two-factor secret.".to_string(),
            Self::InvalidCode => "Invalid authentication code.".to_string(),
            Self::Unauthorized => "Unauthenticated.".to_string(),
            Self::Forbidden(message) | Self::NotFound(message) | Self::Validation(message) => {
                message.clone()
            }
            Self::WorkspaceNotFound(subdomain) => {
                format!("The workspace '{subdomain}' is not initialized or does not exist.")
            }
            Self::Internal(_) => "Internal server error.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("request failed: {err:#}");
        }
        let body = json!({
            "status": "error",
            "message": self.message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(ApiError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AccountDeactivated.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::TwoFactorNotEnabled.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::SecurityError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::InvalidCode.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("nope".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::WorkspaceNotFound("acme".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn workspace_message_names_subdomain() {
        let message = ApiError::WorkspaceNotFound("acme".into()).message();
        assert_eq!(
            message,
            "The workspace 'acme' is not initialized or does not exist."
        );
    }

    #[test]
    fn credential_errors_share_no_detail() {
        // Unknown email and wrong password must be indistinguishable.
        assert_eq!(
            ApiError::InvalidCredentials.message(),
            "Invalid credentials."
        );
    }

    #[test]
    fn internal_errors_are_generic() {
        let err = ApiError::Internal(anyhow::anyhow!("dsn contains password"));
        assert_eq!(err.message(), "Internal server error.");
    }

    #[test]
    fn latency_is_non_negative() {
        let start = RequestStart::now();
        assert!(start.latency_ms() >= 0.0);
    }
}
