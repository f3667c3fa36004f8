//! User management endpoints.
//!
//! Everything here runs against the context database, so the same routes
//! manage central staff on the central hosts and workspace members on
//! tenant hosts. Reads require a session; writes additionally require the
//! `manage users` permission in the current guard.

use axum::{
    Extension,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::sync::Arc;
use tracing::info;
use utoipa::IntoParams;

use super::auth::{principal, storage, types::UserPayload, utils};
use crate::api::{
    AppState,
    envelope::{ApiError, RequestStart, success},
    outbox,
};
use crate::authz;
use crate::stats::{StatsKey, UserStats};
use crate::tenancy::{Guard, RequestContext};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    /// Comma-separated user ids.
    pub ids: Option<String>,
    /// Substring match on name or email.
    pub search: Option<String>,
    /// `active` or `inactive`.
    pub status: Option<String>,
    /// Role name within the current guard.
    pub role: Option<String>,
    /// Inclusive `created_at` lower bound; stays snake_case on the wire.
    #[serde(rename = "date_from")]
    pub date_from: Option<String>,
    /// Inclusive `created_at` upper bound; stays snake_case on the wire.
    #[serde(rename = "date_to")]
    pub date_to: Option<String>,
    pub sort_col: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StoreUserRequest {
    pub name: String,
    pub email: String,
    pub role: String,
    /// Blob-store path of an already-uploaded avatar.
    pub avatar_path: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    /// Replacement avatar path; the previous blob is cleaned up through
    /// the outbox when this differs from the stored one.
    pub avatar_path: Option<String>,
}

/// Sortable columns; anything else falls back to `created_at`.
fn sort_column(requested: Option<&str>) -> &'static str {
    match requested {
        Some("name") => "name",
        Some("email") => "email",
        Some("id") => "id",
        _ => "created_at",
    }
}

fn sort_direction(requested: Option<&str>) -> &'static str {
    match requested {
        Some("asc") => "ASC",
        _ => "DESC",
    }
}

fn page_bounds(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, size)
}

fn parse_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

/// The operator row stays pinned to the top of every listing, central and
/// tenant alike; the requested sort applies after it.
fn order_clause(column: &str, direction: &str) -> String {
    format!(" ORDER BY (u.id = 1) DESC, u.{column} {direction}, u.id DESC")
}

fn apply_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a ListUsersQuery) {
    if let Some(ids) = &query.ids {
        let ids = parse_ids(ids);
        if !ids.is_empty() {
            builder.push(" AND u.id = ANY(");
            builder.push_bind(ids);
            builder.push(")");
        }
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        builder.push(" AND (u.name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR u.email ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    match query.status.as_deref() {
        Some("active") => {
            builder.push(" AND u.is_active");
        }
        Some("inactive") => {
            builder.push(" AND NOT u.is_active");
        }
        _ => {}
    }
    if let Some(role) = query.role.as_deref().filter(|r| !r.is_empty()) {
        builder.push(
            " AND EXISTS (SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = u.id AND r.name = ",
        );
        builder.push_bind(role);
        builder.push(")");
    }
    if let Some(from) = query.date_from.as_deref().filter(|d| !d.is_empty()) {
        builder.push(" AND u.created_at >= ");
        builder.push_bind(from);
        builder.push("::timestamptz");
    }
    if let Some(to) = query.date_to.as_deref().filter(|d| !d.is_empty()) {
        builder.push(" AND u.created_at <= ");
        builder.push_bind(to);
        builder.push("::timestamptz");
    }
}

async fn load_stats(
    state: &AppState,
    pool: &PgPool,
    scope: String,
) -> Result<UserStats, ApiError> {
    let key = StatsKey::users(scope);
    if let Some(stats) = state.stats.get(&key) {
        return Ok(stats);
    }

    let row = sqlx::query(
        r"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE is_active) AS active,
               COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '7 days') AS new_this_week
        FROM users
        ",
    )
    .fetch_one(pool)
    .await
    .map_err(ApiError::from)?;

    let stats = UserStats {
        total_users: row.get("total"),
        active_users: row.get("active"),
        new_this_week: row.get("new_this_week"),
    };
    state.stats.insert(key, stats.clone());
    Ok(stats)
}

#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Paginated user list with aggregates"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal::require_auth(&headers, &context).await?;

    let mut count_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM users u WHERE TRUE");
    apply_filters(&mut count_builder, &query);
    let filtered_total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&context.pool)
        .await?;

    let (page, page_size) = page_bounds(query.page, query.page_size);
    let column = sort_column(query.sort_col.as_deref());
    let direction = sort_direction(query.sort_dir.as_deref());

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT u.id FROM users u WHERE TRUE");
    apply_filters(&mut builder, &query);
    builder.push(order_clause(column, direction));
    builder.push(" LIMIT ");
    builder.push_bind(page_size);
    builder.push(" OFFSET ");
    builder.push_bind((page - 1) * page_size);

    let ids: Vec<i64> = builder
        .build_query_scalar()
        .fetch_all(&context.pool)
        .await?;

    let mut users: Vec<UserPayload> = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = storage::load_user(&context.pool, context.guard, id).await? {
            users.push(user);
        }
    }

    let stats = load_stats(&state, &context.pool, context.scope()).await?;

    Ok(success(
        start,
        StatusCode::OK,
        "OK",
        json!({
            "users": users,
            "stats": stats,
            "pagination": {
                "page": page,
                "page_size": page_size,
                "total": filtered_total,
            },
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = UserPayload),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn show(
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    principal::require_auth(&headers, &context).await?;
    let user = storage::load_user(&context.pool, context.guard, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;
    Ok(success(start, StatusCode::OK, "OK", user))
}

/// Governance role exists only in the central guard; reject before any
/// row is written so nothing needs rolling back.
fn validate_role_assignment(guard: Guard, role: &str) -> Result<(), ApiError> {
    if matches!(guard, Guard::Tenant) && role == "Super Admin" {
        return Err(ApiError::Forbidden(
            "The Super Admin role cannot be assigned in a workspace.".to_string(),
        ));
    }
    Ok(())
}

fn validate_store(request: &StoreUserRequest, guard: Guard) -> Result<(), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("The name field is required.".to_string()));
    }
    if !utils::valid_email(&request.email) {
        return Err(ApiError::Validation(
            "The email must be a valid email address.".to_string(),
        ));
    }
    validate_role_assignment(guard, &request.role)
}

/// The previous blob is reclaimed only when a different path replaces it.
fn replaced_avatar<'a>(old: Option<&'a str>, new: Option<&'a str>) -> Option<&'a str> {
    match (old, new) {
        (Some(old), Some(new)) if old != new => Some(old),
        _ => None,
    }
}

struct OutboxRow {
    kind: &'static str,
    recipient: Option<String>,
    template: Option<&'static str>,
    payload: serde_json::Value,
}

/// One committed user mutation, as seen by the outbox.
enum UserWrite<'a> {
    Created {
        user_id: i64,
        email: &'a str,
        activation_token: &'a str,
    },
    Updated {
        user_id: i64,
        email: &'a str,
        replaced_avatar: Option<&'a str>,
    },
    StatusChanged {
        user_id: i64,
        email: &'a str,
        is_active: bool,
    },
    Deleted {
        user_id: i64,
        avatar_path: Option<&'a str>,
    },
}

/// Every mutation builds its full outbox set up front, so no write path
/// can skip the search-index sync.
fn outbox_rows(write: &UserWrite<'_>) -> Vec<OutboxRow> {
    match write {
        UserWrite::Created {
            user_id,
            email,
            activation_token,
        } => vec![
            OutboxRow {
                kind: outbox::KIND_EMAIL,
                recipient: Some((*email).to_string()),
                template: Some("user_created"),
                payload: json!({ "user_id": user_id, "activation_token": activation_token }),
            },
            OutboxRow {
                kind: outbox::KIND_SEARCH_INDEX,
                recipient: None,
                template: None,
                payload: json!({ "op": "upsert", "user_id": user_id }),
            },
        ],
        UserWrite::Updated {
            user_id,
            email,
            replaced_avatar,
        } => {
            let mut rows = vec![
                OutboxRow {
                    kind: outbox::KIND_EMAIL,
                    recipient: Some((*email).to_string()),
                    template: Some("user_updated"),
                    payload: json!({ "user_id": user_id }),
                },
                OutboxRow {
                    kind: outbox::KIND_SEARCH_INDEX,
                    recipient: None,
                    template: None,
                    payload: json!({ "op": "upsert", "user_id": user_id }),
                },
            ];
            if let Some(path) = replaced_avatar {
                rows.push(OutboxRow {
                    kind: outbox::KIND_AVATAR_GC,
                    recipient: None,
                    template: None,
                    payload: json!({ "path": path }),
                });
            }
            rows
        }
        UserWrite::StatusChanged {
            user_id,
            email,
            is_active,
        } => vec![
            OutboxRow {
                kind: outbox::KIND_EMAIL,
                recipient: Some((*email).to_string()),
                template: Some("user_status_changed"),
                payload: json!({ "user_id": user_id, "is_active": is_active }),
            },
            OutboxRow {
                kind: outbox::KIND_SEARCH_INDEX,
                recipient: None,
                template: None,
                payload: json!({ "op": "upsert", "user_id": user_id }),
            },
        ],
        UserWrite::Deleted {
            user_id,
            avatar_path,
        } => {
            let mut rows = Vec::new();
            if let Some(path) = avatar_path {
                rows.push(OutboxRow {
                    kind: outbox::KIND_AVATAR_GC,
                    recipient: None,
                    template: None,
                    payload: json!({ "path": path }),
                });
            }
            rows.push(OutboxRow {
                kind: outbox::KIND_SEARCH_INDEX,
                recipient: None,
                template: None,
                payload: json!({ "op": "delete", "user_id": user_id }),
            });
            rows
        }
    }
}

async fn enqueue_rows(pool: &PgPool, rows: Vec<OutboxRow>) -> Result<(), ApiError> {
    for row in rows {
        outbox::enqueue(
            pool,
            row.kind,
            row.recipient.as_deref(),
            row.template,
            &row.payload,
        )
        .await?;
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = StoreUserRequest,
    responses(
        (status = 201, description = "User created", body = UserPayload),
        (status = 403, description = "Permission denied"),
        (status = 422, description = "Validation failure")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn store(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StoreUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage users").await?;
    validate_store(&request, context.guard)?;

    let role_id = authz::role_id(&context.pool, context.guard, &request.role)
        .await?
        .ok_or_else(|| ApiError::Validation("The selected role is invalid.".to_string()))?;

    let email = utils::normalize_email(&request.email);
    let password = utils::random_password();
    let password_hash = utils::hash_password(&password).map_err(ApiError::Internal)?;
    let avatar_path = request.avatar_path.as_deref().filter(|p| !p.is_empty());

    let inserted = sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO users (name, email, password_hash, is_active, avatar_path)
        VALUES ($1, $2, $3, TRUE, $4)
        RETURNING id
        ",
    )
    .bind(request.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(avatar_path)
    .fetch_one(&context.pool)
    .await;

    let user_id = match inserted {
        Ok(id) => id,
        Err(err) if utils::is_unique_violation(&err) => {
            return Err(ApiError::Validation(
                "The email has already been taken.".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    };

    authz::sync_role(&context.pool, context.guard, user_id, role_id).await?;

    // The email carries an activation token for the set-password flow,
    // not the generated password.
    let activation_token = utils::generate_session_token();
    enqueue_rows(
        &context.pool,
        outbox_rows(&UserWrite::Created {
            user_id,
            email: &email,
            activation_token: &activation_token,
        }),
    )
    .await?;

    state.stats.invalidate_users(&context.scope());
    info!(user_id, guard = context.guard.as_str(), "user created");

    let user = storage::load_user(&context.pool, context.guard, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("created user vanished")))?;
    Ok(success(
        start,
        StatusCode::CREATED,
        "User created successfully.",
        user,
    ))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserPayload),
        (status = 403, description = "Permission denied or protected account"),
        (status = 404, description = "Unknown user"),
        (status = 422, description = "Validation failure")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    axum::Json(request): axum::Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_overlord_untouched(context.guard, id)?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage users").await?;

    let existing = storage::load_user(&context.pool, context.guard, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;

    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&existing.name)
        .to_string();
    let email = match &request.email {
        Some(email) => {
            if !utils::valid_email(email) {
                return Err(ApiError::Validation(
                    "The email must be a valid email address.".to_string(),
                ));
            }
            utils::normalize_email(email)
        }
        None => existing.email.clone(),
    };
    let avatar_path = request
        .avatar_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| existing.avatar_path.clone());
    let reclaimed = replaced_avatar(existing.avatar_path.as_deref(), avatar_path.as_deref())
        .map(str::to_string);

    // Role validation comes first so a bad role cannot leave the profile
    // half-written with no outbox rows behind it.
    let role_id = match request.role.as_deref().filter(|r| !r.is_empty()) {
        Some(role) => {
            validate_role_assignment(context.guard, role)?;
            Some(
                authz::role_id(&context.pool, context.guard, role)
                    .await?
                    .ok_or_else(|| {
                        ApiError::Validation("The selected role is invalid.".to_string())
                    })?,
            )
        }
        None => None,
    };

    let updated = sqlx::query(
        "UPDATE users SET name = $2, email = $3, avatar_path = $4, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(&name)
    .bind(&email)
    .bind(avatar_path.as_deref())
    .execute(&context.pool)
    .await;

    if let Err(err) = updated {
        if utils::is_unique_violation(&err) {
            return Err(ApiError::Validation(
                "The email has already been taken.".to_string(),
            ));
        }
        return Err(err.into());
    }

    if let Some(role_id) = role_id {
        authz::sync_role(&context.pool, context.guard, id, role_id).await?;
    }

    enqueue_rows(
        &context.pool,
        outbox_rows(&UserWrite::Updated {
            user_id: id,
            email: &email,
            replaced_avatar: reclaimed.as_deref(),
        }),
    )
    .await?;

    state.stats.invalidate_users(&context.scope());
    info!(user_id = id, guard = context.guard.as_str(), "user updated");

    let user = storage::load_user(&context.pool, context.guard, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;
    Ok(success(
        start,
        StatusCode::OK,
        "User updated successfully.",
        user,
    ))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 403, description = "Permission denied or protected account"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn destroy(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_overlord_untouched(context.guard, id)?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage users").await?;

    let avatar_path: Option<String> =
        sqlx::query_scalar("SELECT avatar_path FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&context.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&context.pool)
        .await?;

    enqueue_rows(
        &context.pool,
        outbox_rows(&UserWrite::Deleted {
            user_id: id,
            avatar_path: avatar_path.as_deref(),
        }),
    )
    .await?;

    state.stats.invalidate_users(&context.scope());
    info!(user_id = id, guard = context.guard.as_str(), "user deleted");

    Ok(success(
        start,
        StatusCode::OK,
        "User deleted successfully.",
        json!(null),
    ))
}

#[utoipa::path(
    post,
    path = "/users/{id}/toggle-status",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Active flag flipped", body = UserPayload),
        (status = 403, description = "Permission denied or protected account"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn toggle_status(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(start): Extension<RequestStart>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = principal::require_auth(&headers, &context).await?;
    authz::ensure_overlord_untouched(context.guard, id)?;
    authz::ensure_can(&context.pool, caller.guard, caller.user_id, "manage users").await?;

    let row = sqlx::query(
        r"
        UPDATE users
        SET is_active = NOT is_active, updated_at = NOW()
        WHERE id = $1
        RETURNING email, is_active
        ",
    )
    .bind(id)
    .fetch_optional(&context.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;

    let email: String = row.get("email");
    let is_active: bool = row.get("is_active");

    enqueue_rows(
        &context.pool,
        outbox_rows(&UserWrite::StatusChanged {
            user_id: id,
            email: &email,
            is_active,
        }),
    )
    .await?;

    state.stats.invalidate_users(&context.scope());
    info!(user_id = id, is_active, "user status toggled");

    let user = storage::load_user(&context.pool, context.guard, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;
    let message = if is_active {
        "User activated successfully."
    } else {
        "User deactivated successfully."
    };
    Ok(success(start, StatusCode::OK, message, user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_whitelist_rejects_unknown_columns() {
        assert_eq!(sort_column(Some("name")), "name");
        assert_eq!(sort_column(Some("email")), "email");
        assert_eq!(sort_column(Some("created_at; DROP TABLE users")), "created_at");
        assert_eq!(sort_column(None), "created_at");
    }

    #[test]
    fn sort_direction_defaults_to_desc() {
        assert_eq!(sort_direction(Some("asc")), "ASC");
        assert_eq!(sort_direction(Some("desc")), "DESC");
        assert_eq!(sort_direction(Some("sideways")), "DESC");
        assert_eq!(sort_direction(None), "DESC");
    }

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(page_bounds(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(page_bounds(Some(0), Some(0)), (1, 1));
        assert_eq!(page_bounds(Some(-5), Some(1000)), (1, MAX_PAGE_SIZE));
        assert_eq!(page_bounds(Some(3), Some(25)), (3, 25));
    }

    #[test]
    fn id_csv_parsing_skips_garbage() {
        assert_eq!(parse_ids("1,2, 3"), vec![1, 2, 3]);
        assert_eq!(parse_ids("1,x,3"), vec![1, 3]);
        assert!(parse_ids("").is_empty());
    }

    #[test]
    fn super_admin_is_rejected_in_tenant_guard_before_persistence() {
        let request = StoreUserRequest {
            name: "Mallory".to_string(),
            email: "mallory@example.com".to_string(),
            role: "Super Admin".to_string(),
            avatar_path: None,
        };
        assert!(matches!(
            validate_store(&request, Guard::Tenant),
            Err(ApiError::Forbidden(_))
        ));
        assert!(validate_store(&request, Guard::Central).is_ok());
    }

    #[test]
    fn store_validation_requires_name_and_email() {
        let request = StoreUserRequest {
            name: " ".to_string(),
            email: "alice@example.com".to_string(),
            role: "Employee".to_string(),
            avatar_path: None,
        };
        assert!(matches!(
            validate_store(&request, Guard::Tenant),
            Err(ApiError::Validation(_))
        ));

        let request = StoreUserRequest {
            name: "Alice".to_string(),
            email: "not-an-email".to_string(),
            role: "Employee".to_string(),
            avatar_path: None,
        };
        assert!(matches!(
            validate_store(&request, Guard::Tenant),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn date_filters_keep_their_snake_case_keys() {
        let query: ListUsersQuery = serde_json::from_value(json!({
            "date_from": "2026-01-01",
            "date_to": "2026-02-01",
            "sortCol": "name",
        }))
        .expect("deserialize");
        assert_eq!(query.date_from.as_deref(), Some("2026-01-01"));
        assert_eq!(query.date_to.as_deref(), Some("2026-02-01"));
        assert_eq!(query.sort_col.as_deref(), Some("name"));
    }

    #[test]
    fn role_assignment_is_validated_independently_of_store() {
        assert!(matches!(
            validate_role_assignment(Guard::Tenant, "Super Admin"),
            Err(ApiError::Forbidden(_))
        ));
        assert!(validate_role_assignment(Guard::Central, "Super Admin").is_ok());
        assert!(validate_role_assignment(Guard::Tenant, "Employee").is_ok());
    }

    #[test]
    fn operator_row_is_pinned_in_every_context() {
        let clause = order_clause("name", "ASC");
        assert!(clause.starts_with(" ORDER BY (u.id = 1) DESC"));
        assert!(clause.ends_with("u.name ASC, u.id DESC"));
    }

    #[test]
    fn every_user_write_syncs_the_search_index() {
        let writes = [
            UserWrite::Created {
                user_id: 4,
                email: "bee@example.com",
                activation_token: "token",
            },
            UserWrite::Updated {
                user_id: 4,
                email: "bee@example.com",
                replaced_avatar: None,
            },
            UserWrite::StatusChanged {
                user_id: 4,
                email: "bee@example.com",
                is_active: false,
            },
            UserWrite::Deleted {
                user_id: 4,
                avatar_path: None,
            },
        ];
        for write in &writes {
            let rows = outbox_rows(write);
            assert!(
                rows.iter().any(|r| r.kind == outbox::KIND_SEARCH_INDEX),
                "a write is missing its search index row"
            );
        }
    }

    #[test]
    fn status_toggle_notifies_and_reindexes() {
        let rows = outbox_rows(&UserWrite::StatusChanged {
            user_id: 9,
            email: "bee@example.com",
            is_active: true,
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, outbox::KIND_EMAIL);
        assert_eq!(rows[0].recipient.as_deref(), Some("bee@example.com"));
        assert_eq!(rows[0].template, Some("user_status_changed"));
        assert_eq!(rows[0].payload["is_active"], json!(true));
        assert_eq!(rows[1].kind, outbox::KIND_SEARCH_INDEX);
        assert_eq!(rows[1].payload["op"], json!("upsert"));
    }

    #[test]
    fn replacing_an_avatar_reclaims_the_old_blob() {
        assert_eq!(
            replaced_avatar(Some("avatars/old.webp"), Some("avatars/new.webp")),
            Some("avatars/old.webp")
        );
        assert_eq!(replaced_avatar(Some("avatars/old.webp"), Some("avatars/old.webp")), None);
        assert_eq!(replaced_avatar(None, Some("avatars/new.webp")), None);
        assert_eq!(replaced_avatar(Some("avatars/old.webp"), None), None);

        let rows = outbox_rows(&UserWrite::Updated {
            user_id: 2,
            email: "bee@example.com",
            replaced_avatar: Some("avatars/old.webp"),
        });
        assert!(
            rows.iter()
                .any(|r| r.kind == outbox::KIND_AVATAR_GC
                    && r.payload["path"] == json!("avatars/old.webp"))
        );
    }

    #[test]
    fn deleting_a_user_drops_the_index_entry_and_frees_the_avatar() {
        let rows = outbox_rows(&UserWrite::Deleted {
            user_id: 3,
            avatar_path: Some("avatars/gone.webp"),
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, outbox::KIND_AVATAR_GC);
        assert_eq!(rows[1].kind, outbox::KIND_SEARCH_INDEX);
        assert_eq!(rows[1].payload["op"], json!("delete"));
    }
}
