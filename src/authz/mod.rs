//! Role and permission checks.
//!
//! Roles and permissions are guard-scoped rows in the context database;
//! a user's effective permissions are the union of the permissions of the
//! roles assigned to them within the current guard. The central user with
//! id 1 is the distinguished operator account and cannot be mutated
//! through the API.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{Instrument, info_span};

use crate::api::envelope::ApiError;
use crate::tenancy::Guard;

/// Distinguished operator account, central context only.
pub const OVERLORD_USER_ID: i64 = 1;

/// True when `user_id` is the protected operator account. Tenant databases
/// number their users independently, so the rule applies to central only.
#[must_use]
pub const fn is_overlord(guard: Guard, user_id: i64) -> bool {
    matches!(guard, Guard::Central) && user_id == OVERLORD_USER_ID
}

/// Reject mutations aimed at the operator account.
///
/// # Errors
/// Returns `Forbidden` when the target is the operator account.
pub fn ensure_overlord_untouched(guard: Guard, user_id: i64) -> Result<(), ApiError> {
    if is_overlord(guard, user_id) {
        return Err(ApiError::Forbidden(
            "This account is protected and cannot be modified.".to_string(),
        ));
    }
    Ok(())
}

/// Check whether a user holds a permission in the given guard.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn can(pool: &PgPool, guard: Guard, user_id: i64, permission: &str) -> Result<bool> {
    let query = r"
        SELECT EXISTS (
            SELECT 1
            FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            JOIN permissions p ON p.id = rp.permission_id
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
              AND p.name = $2
              AND p.guard = $3
              AND r.guard = $3
        )
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let allowed: bool = sqlx::query_scalar(query)
        .bind(user_id)
        .bind(permission)
        .bind(guard.as_str())
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check permission")?;
    Ok(allowed)
}

/// Require a permission, mapping denial to 403.
///
/// # Errors
/// Returns `Forbidden` on denial, `Internal` on query failure.
pub async fn ensure_can(
    pool: &PgPool,
    guard: Guard,
    user_id: i64,
    permission: &str,
) -> Result<(), ApiError> {
    if can(pool, guard, user_id, permission).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ))
    }
}

/// Look up a role id by name within the guard.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn role_id(pool: &PgPool, guard: Guard, name: &str) -> Result<Option<i64>> {
    let query = "SELECT id FROM roles WHERE name = $1 AND guard = $2";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let id: Option<i64> = sqlx::query_scalar(query)
        .bind(name)
        .bind(guard.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to look up role")?;
    Ok(id)
}

/// Replace a user's role assignments within the guard with a single role.
///
/// Assignments from the other guard are untouched; each context database
/// only ever holds roles for its own guard anyway.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn sync_role(pool: &PgPool, guard: Guard, user_id: i64, role_id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("begin role sync")?;

    let clear = r"
        DELETE FROM user_roles
        WHERE user_id = $1
          AND role_id IN (SELECT id FROM roles WHERE guard = $2)
    ";
    sqlx::query(clear)
        .bind(user_id)
        .bind(guard.as_str())
        .execute(&mut *tx)
        .await
        .context("failed to clear role assignments")?;

    sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await
        .context("failed to assign role")?;

    tx.commit().await.context("commit role sync")?;
    Ok(())
}

/// Role names assigned to a user within the guard, for API payloads.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn role_names(pool: &PgPool, guard: Guard, user_id: i64) -> Result<Vec<String>> {
    let query = r"
        SELECT r.name
        FROM roles r
        JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = $1 AND r.guard = $2
        ORDER BY r.name
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let names: Vec<String> = sqlx::query_scalar(query)
        .bind(user_id)
        .bind(guard.as_str())
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load role names")?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlord_is_central_id_one_only() {
        assert!(is_overlord(Guard::Central, 1));
        assert!(!is_overlord(Guard::Central, 2));
        assert!(!is_overlord(Guard::Tenant, 1));
    }

    #[test]
    fn overlord_mutation_is_forbidden() {
        let err = ensure_overlord_untouched(Guard::Central, 1).expect_err("must deny");
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(ensure_overlord_untouched(Guard::Tenant, 1).is_ok());
        assert!(ensure_overlord_untouched(Guard::Central, 2).is_ok());
    }
}
