//! CLI arguments for the background outbox worker.

use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_OUTBOX_POLL_SECONDS: &str = "outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH_SIZE: &str = "outbox-batch-size";
pub const ARG_OUTBOX_MAX_ATTEMPTS: &str = "outbox-max-attempts";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Options {
    /// Extract outbox worker options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a default value is missing, which indicates a
    /// wiring bug in the command definition.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            poll_seconds: matches
                .get_one::<u64>(ARG_OUTBOX_POLL_SECONDS)
                .copied()
                .context("missing outbox-poll-seconds default")?,
            batch_size: matches
                .get_one::<usize>(ARG_OUTBOX_BATCH_SIZE)
                .copied()
                .context("missing outbox-batch-size default")?,
            max_attempts: matches
                .get_one::<u32>(ARG_OUTBOX_MAX_ATTEMPTS)
                .copied()
                .context("missing outbox-max-attempts default")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OUTBOX_POLL_SECONDS)
                .long(ARG_OUTBOX_POLL_SECONDS)
                .help("Seconds between outbox polls")
                .default_value("5")
                .env("HIVE_OUTBOX_POLL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH_SIZE)
                .long(ARG_OUTBOX_BATCH_SIZE)
                .help("Rows claimed per outbox poll")
                .default_value("10")
                .env("HIVE_OUTBOX_BATCH_SIZE")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_OUTBOX_MAX_ATTEMPTS)
                .help("Delivery attempts before a row is marked failed")
                .default_value("5")
                .env("HIVE_OUTBOX_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let command = with_args(Command::new("hive"));
        let matches = command.get_matches_from(vec!["hive"]);
        let options = Options::parse(&matches).expect("defaults");
        assert_eq!(options.poll_seconds, 5);
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.max_attempts, 5);
    }

    #[test]
    fn overrides_parse() {
        let command = with_args(Command::new("hive"));
        let matches = command.get_matches_from(vec![
            "hive",
            "--outbox-poll-seconds",
            "1",
            "--outbox-batch-size",
            "50",
            "--outbox-max-attempts",
            "2",
        ]);
        let options = Options::parse(&matches).expect("overrides");
        assert_eq!(options.poll_seconds, 1);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.max_attempts, 2);
    }
}
