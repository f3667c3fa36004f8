//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_CENTRAL_HOSTS, ARG_DSN, ARG_PORT, ARG_SECRET_KEY, ARG_TOTP_ISSUER, outbox,
};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let secret_key = matches
        .get_one::<String>(ARG_SECRET_KEY)
        .cloned()
        .context("missing required argument: --secret-key")?;

    let central_hosts = matches
        .get_one::<String>(ARG_CENTRAL_HOSTS)
        .map(String::as_str)
        .unwrap_or("localhost")
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>();

    let totp_issuer = matches
        .get_one::<String>(ARG_TOTP_ISSUER)
        .cloned()
        .unwrap_or_else(|| "Hive".to_string());

    let outbox = outbox::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        central_hosts,
        secret_key,
        totp_issuer,
        outbox_poll_seconds: outbox.poll_seconds,
        outbox_batch_size: outbox.batch_size,
        outbox_max_attempts: outbox.max_attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(
            [
                ("HIVE_DSN", None::<&str>),
                ("HIVE_SECRET_KEY", None),
                ("HIVE_CENTRAL_HOSTS", None),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "hive",
                    "--dsn",
                    "postgres://user@localhost:5432/hive",
                    "--secret-key",
                    "supersecret",
                    "--central-hosts",
                    "Hive.test, localhost,",
                ]);
                let Action::Server(args) = handler(&matches).expect("server action");
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/hive");
                assert_eq!(args.central_hosts, vec!["hive.test", "localhost"]);
                assert_eq!(args.totp_issuer, "Hive");
                assert_eq!(args.outbox_poll_seconds, 5);
            },
        );
    }
}
