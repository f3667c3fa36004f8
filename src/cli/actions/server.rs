use crate::api::{self, ServerConfig, outbox::OutboxWorkerConfig};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub central_hosts: Vec<String>,
    pub secret_key: String,
    pub totp_issuer: String,
    pub outbox_poll_seconds: u64,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let outbox = OutboxWorkerConfig::new()
        .with_poll_interval_seconds(args.outbox_poll_seconds)
        .with_batch_size(args.outbox_batch_size)
        .with_max_attempts(args.outbox_max_attempts)
        .normalize();

    let config = ServerConfig {
        port: args.port,
        dsn: args.dsn,
        central_hosts: args.central_hosts,
        secret_key: args.secret_key,
        totp_issuer: args.totp_issuer,
        outbox,
    };

    api::serve(config).await
}
