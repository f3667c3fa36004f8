//! Host-header context resolution.
//!
//! Every request carries a `Host` header; the resolver maps it to either the
//! central context (exact match against the configured central hosts) or a
//! tenant context (exact match against the domain registry). Hosts matching
//! neither get a 404 naming the attempted workspace. The resolved
//! [`RequestContext`] and a [`RequestStart`] timestamp ride the request as
//! extensions.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::api::{
    AppState,
    envelope::{ApiError, RequestStart},
};
use crate::tenancy::{RequestContext, TenantRef, registry};

/// Strip an optional `:port` suffix and lowercase the host.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let bare = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            name
        } else {
            host
        }
    });
    bare.trim().to_ascii_lowercase()
}

/// First DNS label of a host, used to name the workspace in 404 messages.
#[must_use]
pub fn first_label(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}

/// Resolve the request's context from its `Host` header and attach it.
///
/// # Errors
/// Returns `WorkspaceNotFound` for hosts bound to no tenant, `Internal` for
/// registry or pool failures.
pub async fn resolve_context(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let start = RequestStart::now();

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(normalize_host)
        .unwrap_or_default();

    let context = if state.config.central_hosts.iter().any(|h| h == &host) {
        RequestContext::central(state.central_pool.clone())
    } else {
        match registry::lookup_tenant_by_domain(&state.central_pool, &host).await? {
            Some(tenant) => {
                let pool = state.pools.get(&tenant.id)?;
                debug!(tenant_id = %tenant.id, host, "resolved tenant context");
                RequestContext::tenant(
                    TenantRef {
                        id: tenant.id,
                        domain: host,
                    },
                    pool,
                )
            }
            None => return Err(ApiError::WorkspaceNotFound(first_label(&host))),
        }
    };

    request.extensions_mut().insert(start);
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_normalization_strips_port_and_case() {
        assert_eq!(normalize_host("Acme.example.COM:8080"), "acme.example.com");
        assert_eq!(normalize_host("localhost"), "localhost");
        assert_eq!(normalize_host("localhost:80"), "localhost");
    }

    #[test]
    fn ipv6_style_hosts_are_left_alone() {
        // Not a port suffix, so nothing is stripped.
        assert_eq!(normalize_host("host:abc"), "host:abc");
    }

    #[test]
    fn first_label_names_the_workspace() {
        assert_eq!(first_label("acme.example.com"), "acme");
        assert_eq!(first_label("localhost"), "localhost");
    }
}
