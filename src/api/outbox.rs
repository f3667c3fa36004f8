//! Background outbox worker and delivery abstractions.
//!
//! User mutations enqueue rows in the context database's `outbox` table:
//! notification emails (`email`), search-index synchronization
//! (`search_index`), and avatar blob cleanup (`avatar_gc`). A background
//! task per pool periodically polls that table, locks a batch via
//! `FOR UPDATE SKIP LOCKED`, and dispatches each row by kind. Handlers
//! never wait on delivery; the queue gives at-least-once semantics with no
//! ordering guarantee across kinds.
//!
//! Failed rows are retried with exponential backoff and jitter until a max
//! attempt threshold is reached, then marked `failed`. The default sender
//! and indexer for local dev log the payload and return `Ok(())`.

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};

pub const KIND_EMAIL: &str = "email";
pub const KIND_SEARCH_INDEX: &str = "search_index";
pub const KIND_AVATAR_GC: &str = "avatar_gc";

#[derive(Clone, Debug)]
pub struct OutboxMessage {
    pub id: i64,
    pub kind: String,
    pub recipient: Option<String>,
    pub template: Option<String>,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
pub trait NotificationSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &OutboxMessage) -> Result<()>;
}

/// Search index synchronization abstraction; the index itself is an
/// external keyword-search provider.
pub trait SearchIndexer: Send + Sync {
    /// Apply one index mutation or return an error to schedule a retry.
    fn sync(&self, message: &OutboxMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogNotificationSender;

impl NotificationSender for LogNotificationSender {
    fn send(&self, message: &OutboxMessage) -> Result<()> {
        info!(
            recipient = message.recipient.as_deref().unwrap_or("-"),
            template = message.template.as_deref().unwrap_or("-"),
            payload = %message.payload_json,
            "outbox email send stub"
        );
        Ok(())
    }
}

/// Local dev indexer that logs the mutation instead of calling a provider.
#[derive(Clone, Debug)]
pub struct LogSearchIndexer;

impl SearchIndexer for LogSearchIndexer {
    fn sync(&self, message: &OutboxMessage) -> Result<()> {
        info!(payload = %message.payload_json, "outbox search index stub");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutboxWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OutboxWorkerConfig {
    /// Default worker config: 5s poll interval, 10 rows per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let batch_size = if self.batch_size == 0 { 1 } else { self.batch_size };
        let max_attempts = self.max_attempts.max(1);
        Self {
            poll_interval,
            batch_size,
            max_attempts,
            ..self
        }
    }
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic part of the retry delay; jitter is added at schedule time.
fn backoff_delay(config: &OutboxWorkerConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let factor = 2u64.saturating_pow(exponent);
    let delay = config.backoff_base.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
    delay.min(config.backoff_max)
}

fn jittered_seconds(delay: Duration) -> i64 {
    let base = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=base.max(1) / 5 + 1);
    base.saturating_add(jitter)
}

/// Queue a new outbox row on the current context's database.
///
/// # Errors
/// Returns an error if the insert fails.
pub async fn enqueue<'e, E>(
    executor: E,
    kind: &str,
    recipient: Option<&str>,
    template: Option<&str>,
    payload: &serde_json::Value,
) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = r"
        INSERT INTO outbox (kind, recipient, template, payload_json)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(kind)
        .bind(recipient)
        .bind(template)
        .bind(payload)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to enqueue outbox row")?;
    Ok(())
}

/// Spawn the polling worker for one context database. The task stops on
/// its own once the pool is closed, so evicting a tenant pool also retires
/// its worker.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn NotificationSender>,
    indexer: Arc<dyn SearchIndexer>,
    config: OutboxWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    let config = config.normalize();
    tokio::spawn(async move {
        loop {
            if pool.is_closed() {
                info!("outbox worker stopping, pool closed");
                break;
            }
            if let Err(err) = process_batch(&pool, sender.as_ref(), indexer.as_ref(), &config).await
            {
                error!("outbox batch failed: {err:#}");
            }
            sleep(config.poll_interval).await;
        }
    })
}

async fn process_batch(
    pool: &PgPool,
    sender: &dyn NotificationSender,
    indexer: &dyn SearchIndexer,
    config: &OutboxWorkerConfig,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin outbox batch")?;

    let query = r"
        SELECT id, kind, recipient, template, payload_json::text AS payload_json, attempts
        FROM outbox
        WHERE status = 'pending' AND next_attempt_at <= NOW()
        ORDER BY id
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size).unwrap_or(10))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to claim outbox batch")?;

    for row in rows {
        let message = OutboxMessage {
            id: row.get("id"),
            kind: row.get("kind"),
            recipient: row.get("recipient"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };
        let attempts: i32 = row.get("attempts");

        let outcome = match message.kind.as_str() {
            KIND_SEARCH_INDEX => indexer.sync(&message),
            // Avatar blob cleanup rides the notification path: the blob
            // store is external, so "delete" is just another delivery.
            KIND_EMAIL | KIND_AVATAR_GC => sender.send(&message),
            other => {
                error!(kind = other, id = message.id, "unknown outbox kind");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => mark_sent(&mut tx, message.id).await?,
            Err(err) => {
                error!(id = message.id, "outbox delivery failed: {err:#}");
                let attempts = u32::try_from(attempts).unwrap_or(0) + 1;
                if attempts >= config.max_attempts {
                    mark_failed(&mut tx, message.id).await?;
                } else {
                    let delay = jittered_seconds(backoff_delay(config, attempts));
                    mark_retry(&mut tx, message.id, delay).await?;
                }
            }
        }
    }

    tx.commit().await.context("commit outbox batch")?;
    Ok(())
}

async fn mark_sent(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, id: i64) -> Result<()> {
    sqlx::query("UPDATE outbox SET status = 'sent', sent_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("failed to mark outbox row sent")?;
    Ok(())
}

async fn mark_failed(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, id: i64) -> Result<()> {
    sqlx::query("UPDATE outbox SET status = 'failed', attempts = attempts + 1 WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("failed to mark outbox row failed")?;
    Ok(())
}

async fn mark_retry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
    delay_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE outbox
        SET attempts = attempts + 1,
            next_attempt_at = NOW() + ($2 * INTERVAL '1 second')
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(id)
        .bind(delay_seconds)
        .execute(&mut **tx)
        .await
        .context("failed to schedule outbox retry")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = OutboxWorkerConfig::new();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 30), Duration::from_secs(300));
    }

    #[test]
    fn normalize_fixes_zero_values() {
        let config = OutboxWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .normalize();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn jitter_never_shrinks_the_delay() {
        let delay = Duration::from_secs(20);
        for _ in 0..50 {
            let seconds = jittered_seconds(delay);
            assert!(seconds >= 20);
            assert!(seconds <= 25 + 1);
        }
    }

    #[tokio::test]
    async fn worker_exits_once_the_pool_is_closed() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://hive@localhost:1/hive")
            .expect("lazy pool");
        pool.close().await;

        let handle = spawn_outbox_worker(
            pool,
            Arc::new(LogNotificationSender),
            Arc::new(LogSearchIndexer),
            OutboxWorkerConfig::new(),
        );
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker kept polling a closed pool")
            .expect("worker task panicked");
    }

    #[test]
    fn log_sender_and_indexer_accept_messages() {
        let message = OutboxMessage {
            id: 1,
            kind: KIND_EMAIL.to_string(),
            recipient: Some("alice@example.com".to_string()),
            template: Some("user_created".to_string()),
            payload_json: "{}".to_string(),
        };
        assert!(LogNotificationSender.send(&message).is_ok());
        assert!(LogSearchIndexer.sync(&message).is_ok());
    }
}
