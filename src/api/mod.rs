//! HTTP server wiring.
//!
//! The router is built once and serves every host: the resolver middleware
//! maps each request's Host header to the central or a tenant context, and
//! handlers read their database from that context. `/health` and `/` sit
//! outside the resolver so probes need no registered host.

use anyhow::{Context, Result};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod envelope;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod outbox;

pub use openapi::openapi;

use crate::stats::StatsCache;
use crate::tenancy::{pools::TenantPools, resolver};
use crate::totp::TotpEngine;
use outbox::OutboxWorkerConfig;

static CENTRAL_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/central");

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    /// Hostnames served in the central context; everything else goes
    /// through the tenant domain registry.
    pub central_hosts: Vec<String>,
    /// Master key for TOTP secret encryption.
    pub secret_key: String,
    pub totp_issuer: String,
    pub outbox: OutboxWorkerConfig,
}

/// Process-wide state shared by all handlers via extension.
pub struct AppState {
    pub config: ServerConfig,
    pub central_pool: sqlx::PgPool,
    pub pools: TenantPools,
    pub stats: StatsCache,
    pub totp: TotpEngine,
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database is unreachable, migrations fail, or the
/// listener cannot bind.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let central_pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    CENTRAL_MIGRATOR
        .run(&central_pool)
        .await
        .context("Failed to run central migrations")?;

    bootstrap_central_admin(&central_pool).await?;

    // The central database carries its own outbox, same as every tenant.
    outbox::spawn_outbox_worker(
        central_pool.clone(),
        Arc::new(outbox::LogNotificationSender),
        Arc::new(outbox::LogSearchIndexer),
        config.outbox,
    );

    let pools = TenantPools::new(&config.dsn, config.outbox)?;
    let totp = TotpEngine::new(&config.secret_key, config.totp_issuer.clone());
    let port = config.port;

    let state = Arc::new(AppState {
        config,
        central_pool,
        pools,
        stats: StatsCache::new(),
        totp,
    });

    let (api_routes, _openapi) = router().split_for_parts();
    let (health_routes, _) = openapi::health_router().split_for_parts();

    let app = api_routes
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolver::resolve_context,
        ))
        .merge(health_routes)
        .route("/", get(handlers::root::root))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                // Tenant domains are arbitrary, so origin allow-listing is
                // left to the proxy in front of this service.
                .layer(CorsLayer::permissive())
                .layer(Extension(state)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Seed the first central account on an empty database. The generated
/// password is logged once; it should be rotated after first login.
async fn bootstrap_central_admin(pool: &sqlx::PgPool) -> Result<()> {
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    if user_count > 0 {
        return Ok(());
    }

    let password = handlers::auth::utils::random_password();
    let password_hash = handlers::auth::utils::hash_password(&password)?;

    let admin_id: i64 = sqlx::query_scalar(
        r"
        INSERT INTO users (name, email, password_hash, is_active)
        VALUES ('Hive Overlord', 'super@hive.os', $1, TRUE)
        RETURNING id
        ",
    )
    .bind(&password_hash)
    .fetch_one(pool)
    .await
    .context("Failed to seed central admin")?;

    let role_id = crate::authz::role_id(pool, crate::tenancy::Guard::Central, "Super Admin")
        .await?
        .context("seeded Super Admin role missing")?;
    crate::authz::sync_role(pool, crate::tenancy::Guard::Central, admin_id, role_id).await?;

    info!(
        admin_id,
        email = "super@hive.os",
        %password,
        "seeded initial central admin"
    );
    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
