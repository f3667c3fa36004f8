use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Verify2faRequest {
    pub user_id: i64,
    pub code: String,
}

/// User shape shared by login, `/user`, and the user management endpoints.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UserPayload {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub avatar_path: Option<String>,
    pub two_factor_enabled: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Successful login body; `context` tells the SPA which shell to load.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginSuccess {
    pub user: UserPayload,
    pub token: String,
    pub context: &'static str,
}

/// Interim response when the account has a confirmed second factor.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorChallenge {
    pub requires_2fa: bool,
    pub user_id: i64,
}

impl TwoFactorChallenge {
    #[must_use]
    pub const fn for_user(user_id: i64) -> Self {
        Self {
            requires_2fa: true,
            user_id,
        }
    }
}
