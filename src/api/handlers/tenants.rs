//! Tenant provisioning endpoints, central context only.

use axum::{
    Extension,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::auth::principal;
use crate::api::{
    AppState,
    envelope::{ApiError, RequestStart, success},
};
use crate::authz;
use crate::tenancy::{Guard, RequestContext, provision};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ProvisionRequest {
    pub id: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    pub domain: String,
    pub admin_email: String,
}

fn default_plan() -> String {
    "larva".to_string()
}

fn ensure_central(context: &RequestContext) -> Result<(), ApiError> {
    if matches!(context.guard, Guard::Central) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Tenant management is only available on the central application.".to_string(),
        ))
    }
}

#[utoipa::path(
    post,
    path = "/tenants",
    request_body = ProvisionRequest,
    responses(
        (status = 201, description = "Tenant provisioned"),
        (status = 403, description = "Permission denied or wrong context"),
        (status = 422, description = "Validation failure")
    ),
    security(("bearer" = [])),
    tag = "tenants"
)]
pub async fn provision(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ProvisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_central(&context)?;
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage tenants").await?;

    let tenant = provision::provision(
        &state,
        &request.id,
        &request.plan,
        &request.domain,
        &request.admin_email,
    )
    .await?;

    Ok(success(
        start,
        StatusCode::CREATED,
        "Tenant provisioned successfully.",
        json!({
            "id": tenant.record.id,
            "plan": tenant.record.plan,
            "domain": tenant.domain,
            "admin_email": tenant.admin_email,
            "created_at": tenant.record.created_at,
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/tenants/{id}",
    params(("id" = String, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant destroyed"),
        (status = 403, description = "Permission denied or wrong context"),
        (status = 404, description = "Unknown tenant")
    ),
    security(("bearer" = [])),
    tag = "tenants"
)]
pub async fn deprovision(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_central(&context)?;
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage tenants").await?;

    if !provision::deprovision(&state, &id).await? {
        return Err(ApiError::NotFound("Tenant not found.".to_string()));
    }

    Ok(success(
        start,
        StatusCode::OK,
        "Tenant deprovisioned successfully.",
        json!(null),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_larva() {
        assert_eq!(default_plan(), "larva");
    }
}
