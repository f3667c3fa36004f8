//! Per-tenant database pool cache.
//!
//! Tenant databases live on the same Postgres server as the central
//! database; only the database name differs (`tenant_{id}`). Pools are
//! created lazily on the first request for a tenant and shared afterwards.
//! Each new pool also gets its own outbox worker, because every context
//! database carries its own outbox table.

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use tracing::info;
use url::Url;

use crate::api::outbox::{self, OutboxWorkerConfig};

/// Database name for a tenant, always derived from the registry id.
#[must_use]
pub fn tenant_db_name(tenant_id: &str) -> String {
    format!("tenant_{tenant_id}")
}

#[derive(Clone)]
pub struct TenantPools {
    base: Url,
    outbox_config: OutboxWorkerConfig,
    inner: Arc<RwLock<HashMap<String, PgPool>>>,
}

impl TenantPools {
    /// Build the pool cache from the central DSN; tenant DSNs are derived by
    /// swapping the database name.
    ///
    /// # Errors
    /// Returns an error if the DSN is not a valid URL.
    pub fn new(dsn: &str, outbox_config: OutboxWorkerConfig) -> Result<Self> {
        let base = Url::parse(dsn).context("invalid database DSN")?;
        Ok(Self {
            base,
            outbox_config,
            inner: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get or lazily create the pool for a tenant database.
    ///
    /// # Errors
    /// Returns an error if the derived DSN is invalid. Connection failures
    /// surface later, on first use, because pools connect lazily.
    pub fn get(&self, tenant_id: &str) -> Result<PgPool> {
        let db_name = tenant_db_name(tenant_id);

        if let Some(pool) = self
            .inner
            .read()
            .ok()
            .and_then(|pools| pools.get(&db_name).cloned())
        {
            return Ok(pool);
        }

        let pool = self.connect(&db_name)?;

        let mut pools = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("tenant pool cache lock poisoned"))?;
        // Another request may have raced us; keep the first pool and drop ours.
        if let Some(existing) = pools.get(&db_name) {
            return Ok(existing.clone());
        }
        pools.insert(db_name.clone(), pool.clone());
        drop(pools);

        info!(tenant_id, db = %db_name, "opened tenant database pool");
        outbox::spawn_outbox_worker(
            pool.clone(),
            Arc::new(outbox::LogNotificationSender),
            Arc::new(outbox::LogSearchIndexer),
            self.outbox_config,
        );

        Ok(pool)
    }

    /// Drop the cached pool for a tenant, closing its connections. Used by
    /// deprovisioning so the dropped database is not held open.
    pub fn evict(&self, tenant_id: &str) {
        let db_name = tenant_db_name(tenant_id);
        let removed = self
            .inner
            .write()
            .ok()
            .and_then(|mut pools| pools.remove(&db_name));
        if let Some(pool) = removed {
            // close() is async but we only need to signal; connections drain
            // in the background.
            tokio::spawn(async move { pool.close().await });
        }
    }

    /// DSN for a tenant database, exposed for provisioning.
    ///
    /// # Errors
    /// Returns an error if the database name cannot be applied to the DSN.
    pub fn dsn_for(&self, db_name: &str) -> Result<Url> {
        let mut dsn = self.base.clone();
        dsn.set_path(&format!("/{db_name}"));
        Ok(dsn)
    }

    fn connect(&self, db_name: &str) -> Result<PgPool> {
        let dsn = self.dsn_for(db_name)?;
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect_lazy(dsn.as_str())
            .context("failed to build tenant pool")?;
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_db_names_are_prefixed() {
        assert_eq!(tenant_db_name("acme"), "tenant_acme");
    }

    #[test]
    fn dsn_swaps_database_name() {
        let pools = TenantPools::new(
            "postgres://user:pw@localhost:5432/hive",
            OutboxWorkerConfig::new(),
        )
        .expect("pools");
        let dsn = pools.dsn_for("tenant_acme").expect("dsn");
        assert_eq!(dsn.as_str(), "postgres://user:pw@localhost:5432/tenant_acme");
    }

    #[test]
    fn rejects_invalid_dsn() {
        assert!(TenantPools::new("not a url", OutboxWorkerConfig::new()).is_err());
    }
}
