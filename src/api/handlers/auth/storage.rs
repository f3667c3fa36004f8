//! Identity queries for the current context database.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Instrument, info_span, warn};

use super::types::UserPayload;
use super::utils;
use crate::authz;
use crate::tenancy::Guard;

const TOKEN_INSERT_RETRIES: u32 = 3;

/// Credential row for the login check; loaded by email regardless of the
/// account's active flag so deactivation can be reported distinctly.
#[derive(Debug)]
pub struct CredentialRecord {
    pub id: i64,
    pub password_hash: String,
    pub is_active: bool,
    pub two_factor_confirmed: bool,
}

pub async fn lookup_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<CredentialRecord>> {
    let query = r"
        SELECT id, password_hash, is_active,
               (two_factor_secret IS NOT NULL AND two_factor_confirmed_at IS NOT NULL)
                   AS two_factor_confirmed
        FROM users
        WHERE email = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        two_factor_confirmed: row.get("two_factor_confirmed"),
    }))
}

/// Full user payload with guard-scoped roles.
pub async fn load_user(pool: &PgPool, guard: Guard, user_id: i64) -> Result<Option<UserPayload>> {
    let query = r"
        SELECT id, name, email, is_active, avatar_path,
               (two_factor_secret IS NOT NULL AND two_factor_confirmed_at IS NOT NULL)
                   AS two_factor_enabled,
               created_at
        FROM users
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load user")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let roles = authz::role_names(pool, guard, user_id).await?;

    Ok(Some(UserPayload {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        is_active: row.get("is_active"),
        avatar_path: row.get("avatar_path"),
        two_factor_enabled: row.get("two_factor_enabled"),
        roles,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }))
}

/// Create a session row and return the raw token. Retries on the unlikely
/// token collision; only the SHA-256 of the token is stored.
pub async fn insert_session(
    pool: &PgPool,
    user_id: i64,
    device_label: Option<&str>,
) -> Result<String> {
    let query = r"
        INSERT INTO sessions (user_id, token_hash, device_label)
        VALUES ($1, $2, $3)
    ";
    for attempt in 1..=TOKEN_INSERT_RETRIES {
        let token = utils::generate_session_token();
        let token_hash = utils::hash_session_token(&token);

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        match sqlx::query(query)
            .bind(user_id)
            .bind(&token_hash)
            .bind(device_label)
            .execute(pool)
            .instrument(span)
            .await
        {
            Ok(_) => return Ok(token),
            Err(err) if utils::is_unique_violation(&err) && attempt < TOKEN_INSERT_RETRIES => {
                warn!(attempt, "session token collision, regenerating");
            }
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }
    Err(anyhow::anyhow!("exhausted session token attempts"))
}

/// Resolve a raw bearer token to its user id. Only active users resolve;
/// a deactivated account invalidates its sessions immediately. Touches
/// `last_seen_at` as a side effect.
pub async fn lookup_session(pool: &PgPool, token: &str) -> Result<Option<i64>> {
    let token_hash = utils::hash_session_token(token);
    let query = r"
        UPDATE sessions
        SET last_seen_at = NOW()
        FROM users
        WHERE sessions.token_hash = $1
          AND users.id = sessions.user_id
          AND users.is_active
        RETURNING sessions.user_id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let user_id: Option<i64> = sqlx::query_scalar(query)
        .bind(&token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;
    Ok(user_id)
}

/// Delete the session behind a raw token. Returns false when the token was
/// already unknown, which logout treats as success.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<bool> {
    let token_hash = utils::hash_session_token(token);
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(result.rows_affected() > 0)
}

/// Encrypted second-factor state for one user.
#[derive(Debug)]
pub struct TwoFactorRecord {
    pub email: String,
    pub is_active: bool,
    pub secret: Option<Vec<u8>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

pub async fn lookup_two_factor(pool: &PgPool, user_id: i64) -> Result<Option<TwoFactorRecord>> {
    let query = r"
        SELECT email, is_active, two_factor_secret, two_factor_confirmed_at
        FROM users
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load two-factor state")?;

    Ok(row.map(|row| TwoFactorRecord {
        email: row.get("email"),
        is_active: row.get("is_active"),
        secret: row.get("two_factor_secret"),
        confirmed_at: row.get("two_factor_confirmed_at"),
    }))
}

/// Store a freshly generated, unconfirmed secret.
pub async fn store_two_factor_secret(
    pool: &PgPool,
    user_id: i64,
    encrypted_secret: &[u8],
) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_secret = $2,
            two_factor_confirmed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(encrypted_secret)
        .execute(pool)
        .await
        .context("failed to store two-factor secret")?;
    Ok(())
}

pub async fn confirm_two_factor(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_confirmed_at = NOW(), updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to confirm two-factor")?;
    Ok(())
}

pub async fn clear_two_factor(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_secret = NULL,
            two_factor_confirmed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to clear two-factor")?;
    Ok(())
}
