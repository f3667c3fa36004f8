//! Tenant-aware request context.
//!
//! Every request is resolved to a [`RequestContext`] before any handler
//! runs: the guard (role namespace), the tenant it belongs to (if any), and
//! the database pool for that context. The context is attached as an axum
//! extension and dropped with the request, so no tenant database handle ever
//! crosses request boundaries.

pub mod pools;
pub mod provision;
pub mod registry;
pub mod resolver;

use serde::Serialize;
use sqlx::PgPool;

/// Role/permission namespace for the current context.
///
/// Central and tenant guards are disjoint: a role named `Admin` in one guard
/// is unrelated to a role of the same name in the other.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Guard {
    Central,
    Tenant,
}

impl Guard {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Central => "central",
            Self::Tenant => "tenant",
        }
    }
}

/// Tenant identity carried by tenant-context requests.
#[derive(Clone, Debug)]
pub struct TenantRef {
    pub id: String,
    pub domain: String,
}

/// Request-scoped routing context: guard plus the database it maps to.
#[derive(Clone)]
pub struct RequestContext {
    pub guard: Guard,
    pub tenant: Option<TenantRef>,
    pub pool: PgPool,
}

impl RequestContext {
    #[must_use]
    pub fn central(pool: PgPool) -> Self {
        Self {
            guard: Guard::Central,
            tenant: None,
            pool,
        }
    }

    #[must_use]
    pub fn tenant(tenant: TenantRef, pool: PgPool) -> Self {
        Self {
            guard: Guard::Tenant,
            tenant: Some(tenant),
            pool,
        }
    }

    /// Cache/AAD scope for this context. Tenant scopes carry the tenant id
    /// so two tenants never share cached aggregates or ciphertext bindings.
    #[must_use]
    pub fn scope(&self) -> String {
        match (&self.guard, &self.tenant) {
            (Guard::Tenant, Some(tenant)) => format!("tenant:{}", tenant.id),
            _ => "central".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Guard;

    #[test]
    fn guard_strings() {
        assert_eq!(Guard::Central.as_str(), "central");
        assert_eq!(Guard::Tenant.as_str(), "tenant");
    }

    #[test]
    fn guard_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Guard::Tenant).expect("serialize"),
            "\"tenant\""
        );
    }
}
