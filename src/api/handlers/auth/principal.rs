//! Authenticated caller identity.

use axum::http::HeaderMap;

use super::{storage, utils};
use crate::api::envelope::ApiError;
use crate::tenancy::{Guard, RequestContext};

/// The authenticated caller, resolved from the bearer token against the
/// current context's session table. A central token is useless on a tenant
/// host because the session row lives in a different database.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: i64,
    pub guard: Guard,
}

/// Resolve the caller or fail with 401.
///
/// # Errors
/// Returns `Unauthorized` when the token is missing, unknown, or belongs to
/// a deactivated account.
pub async fn require_auth(
    headers: &HeaderMap,
    context: &RequestContext,
) -> Result<Principal, ApiError> {
    let token = utils::extract_bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let user_id = storage::lookup_session(&context.pool, &token)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Principal {
        user_id,
        guard: context.guard,
    })
}
