//! Tenant lifecycle: create and destroy tenant databases.
//!
//! Provisioning is destructive-by-design: creating a tenant drops any
//! previous database of the same name first, so re-provisioning an id gives
//! a clean slate. Identifiers are restricted to a safe character set and
//! the database name is always derived, never taken from input, because it
//! is interpolated into DDL that cannot be parameterized.

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::{Connection, PgConnection, migrate::Migrator};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::api::envelope::ApiError;
use crate::api::handlers::auth::utils;
use crate::api::outbox;
use crate::api::AppState;
use crate::authz;
use crate::tenancy::{Guard, pools::tenant_db_name, registry};

static TENANT_MIGRATOR: Migrator = sqlx::migrate!("migrations/tenant");

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("valid pattern"))
}

/// Validate a tenant identifier. The id becomes part of a database name so
/// it is limited to lowercase alphanumerics and hyphens.
///
/// # Errors
/// Returns `Validation` when the id does not match the allowed pattern.
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), ApiError> {
    if tenant_id_pattern().is_match(tenant_id) {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "Tenant id must be lowercase alphanumerics and hyphens.".to_string(),
        ))
    }
}

pub struct ProvisionedTenant {
    pub record: registry::TenantRecord,
    pub domain: String,
    pub admin_email: String,
}

/// Create a tenant: registry row, dedicated database, schema, seed roles,
/// and an initial admin account whose credentials go out via the outbox.
///
/// # Errors
/// Returns `Validation` for bad input or domain conflicts, `Internal` for
/// database failures.
pub async fn provision(
    state: &Arc<AppState>,
    tenant_id: &str,
    plan: &str,
    domain: &str,
    admin_email: &str,
) -> Result<ProvisionedTenant, ApiError> {
    validate_tenant_id(tenant_id)?;
    if !utils::valid_email(admin_email) {
        return Err(ApiError::Validation("Invalid admin email address.".to_string()));
    }
    let domain = domain.trim().to_ascii_lowercase();
    if domain.is_empty() {
        return Err(ApiError::Validation("Domain must not be empty.".to_string()));
    }
    if registry::domain_owned_by_other(&state.central_pool, &domain, tenant_id).await? {
        return Err(ApiError::Validation(
            "Domain is already bound to another tenant.".to_string(),
        ));
    }

    let db_name = tenant_db_name(tenant_id);

    // Stale pool from a previous life of this tenant would point at the
    // dropped database.
    state.pools.evict(tenant_id);

    recreate_database(state, &db_name).await?;

    // Registry row is replaced, not updated, matching the clean-slate DB.
    registry::delete_tenant(&state.central_pool, tenant_id).await?;
    let record =
        registry::insert_tenant(&state.central_pool, tenant_id, plan, &domain).await?;

    let pool = state.pools.get(tenant_id)?;
    TENANT_MIGRATOR
        .run(&pool)
        .await
        .context("failed to migrate tenant database")?;

    let admin_email = utils::normalize_email(admin_email);
    let password = utils::random_password();
    let password_hash = utils::hash_password(&password)?;

    let admin_id: i64 = sqlx::query_scalar(
        r"
        INSERT INTO users (name, email, password_hash, is_active)
        VALUES ('Admin', $1, $2, TRUE)
        RETURNING id
        ",
    )
    .bind(&admin_email)
    .bind(&password_hash)
    .fetch_one(&pool)
    .await
    .context("failed to seed tenant admin")?;

    let role_id = authz::role_id(&pool, Guard::Tenant, "Admin")
        .await?
        .context("seeded Admin role missing")?;
    authz::sync_role(&pool, Guard::Tenant, admin_id, role_id).await?;

    outbox::enqueue(
        &pool,
        outbox::KIND_EMAIL,
        Some(&admin_email),
        Some("tenant_provisioned"),
        &serde_json::json!({
            "tenant_id": tenant_id,
            "domain": domain,
            "password": password,
        }),
    )
    .await?;

    info!(tenant_id, %domain, "provisioned tenant");
    Ok(ProvisionedTenant {
        record,
        domain,
        admin_email,
    })
}

/// Destroy a tenant: drop its database, remove the registry row, and close
/// any cached pool. Idempotent; returns false when nothing existed.
///
/// # Errors
/// Returns `Validation` for bad ids, `Internal` for database failures.
pub async fn deprovision(state: &Arc<AppState>, tenant_id: &str) -> Result<bool, ApiError> {
    validate_tenant_id(tenant_id)?;

    state.pools.evict(tenant_id);

    let db_name = tenant_db_name(tenant_id);
    let mut conn = admin_connection(state).await?;
    drop_database(&mut conn, &db_name).await?;

    let existed = registry::delete_tenant(&state.central_pool, tenant_id).await?;
    if existed {
        info!(tenant_id, "deprovisioned tenant");
    } else {
        warn!(tenant_id, "deprovision of unknown tenant");
    }
    Ok(existed)
}

async fn recreate_database(state: &Arc<AppState>, db_name: &str) -> Result<()> {
    let mut conn = admin_connection(state).await?;
    drop_database(&mut conn, db_name).await?;
    // DDL cannot be parameterized; db_name is derived from a validated id.
    sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
        .execute(&mut conn)
        .await
        .context("failed to create tenant database")?;
    Ok(())
}

async fn drop_database(conn: &mut PgConnection, db_name: &str) -> Result<()> {
    sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{db_name}" WITH (FORCE)"#))
        .execute(conn)
        .await
        .context("failed to drop tenant database")?;
    Ok(())
}

/// Dedicated connection on the central database for CREATE/DROP DATABASE,
/// which cannot run inside a pooled transaction.
async fn admin_connection(state: &Arc<AppState>) -> Result<PgConnection> {
    PgConnection::connect(&state.config.dsn)
        .await
        .context("failed to open admin connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_safe_tenant_ids() {
        assert!(validate_tenant_id("acme").is_ok());
        assert!(validate_tenant_id("acme-2").is_ok());
        assert!(validate_tenant_id("a").is_ok());
    }

    #[test]
    fn rejects_unsafe_tenant_ids() {
        assert!(validate_tenant_id("").is_err());
        assert!(validate_tenant_id("Acme").is_err());
        assert!(validate_tenant_id("acme_2").is_err());
        assert!(validate_tenant_id("acme;drop").is_err());
        assert!(validate_tenant_id("-acme").is_err());
        assert!(validate_tenant_id(&"a".repeat(64)).is_err());
    }

    #[test]
    fn derived_db_names_are_quotable() {
        assert_eq!(tenant_db_name("acme-2"), "tenant_acme-2");
    }
}
