//! Central registry of tenants and their bound domains.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;

/// A tenant row from the central registry.
#[derive(Clone, Debug)]
pub struct TenantRecord {
    pub id: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

/// Look up the tenant owning `domain`, if any. This is the only query the
/// resolver runs for unknown hosts, so it must not touch tenant databases.
pub async fn lookup_tenant_by_domain(
    pool: &PgPool,
    domain: &str,
) -> Result<Option<TenantRecord>> {
    let query = r"
        SELECT tenants.id, tenants.plan, tenants.created_at
        FROM tenant_domains
        JOIN tenants ON tenants.id = tenant_domains.tenant_id
        WHERE tenant_domains.domain = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(domain)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup tenant by domain")?;

    Ok(row.map(|row| TenantRecord {
        id: row.get("id"),
        plan: row.get("plan"),
        created_at: row.get("created_at"),
    }))
}

pub async fn lookup_tenant(pool: &PgPool, tenant_id: &str) -> Result<Option<TenantRecord>> {
    let query = "SELECT id, plan, created_at FROM tenants WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(tenant_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup tenant")?;

    Ok(row.map(|row| TenantRecord {
        id: row.get("id"),
        plan: row.get("plan"),
        created_at: row.get("created_at"),
    }))
}

/// Insert a tenant and bind its first domain in one transaction.
pub async fn insert_tenant(
    pool: &PgPool,
    tenant_id: &str,
    plan: &str,
    domain: &str,
) -> Result<TenantRecord> {
    let mut tx = pool.begin().await.context("begin tenant insert")?;

    let query = r"
        INSERT INTO tenants (id, plan)
        VALUES ($1, $2)
        RETURNING id, plan, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(tenant_id)
        .bind(plan)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert tenant")?;

    let query = "INSERT INTO tenant_domains (domain, tenant_id) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(domain)
        .bind(tenant_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to bind tenant domain")?;

    tx.commit().await.context("commit tenant insert")?;

    Ok(TenantRecord {
        id: row.get("id"),
        plan: row.get("plan"),
        created_at: row.get("created_at"),
    })
}

/// Remove a tenant record; domains cascade. Returns false when no record
/// existed (deprovision stays idempotent).
pub async fn delete_tenant(pool: &PgPool, tenant_id: &str) -> Result<bool> {
    let query = "DELETE FROM tenants WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(tenant_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete tenant")?;
    Ok(result.rows_affected() > 0)
}

/// Check whether a domain is bound to a different tenant.
pub async fn domain_owned_by_other(
    pool: &PgPool,
    domain: &str,
    tenant_id: &str,
) -> Result<bool> {
    let query = "SELECT tenant_id FROM tenant_domains WHERE domain = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(domain)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check domain ownership")?;
    Ok(row.is_some_and(|row| row.get::<String, _>("tenant_id") != tenant_id))
}
