//! CLI definition and the probe command.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::broker::RedisMailbox;
use crate::config::{ProbeConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
use crate::probe::{list_queues, print_age_state, probe_queue};
use crate::storage::RedisStore;

/// Inspect pending messages and active tasks of a Redis-backed task queue.
#[derive(Parser, Debug, Clone)]
#[command(name = "queue-probe")]
#[command(about = "Print the next messages of a task queue and the tasks workers are running")]
#[command(version)]
#[command(disable_help_flag = true)]
#[command(
    long_about = "queue-probe reads entries from the head of a queue without consuming them, decodes their task payload and reports which tasks the workers serving that queue are executing.\n\nExit status is 1 when any entry body could not be decoded.\n\nExample usage:\n  queue-probe --host redis.internal --queue orders --items 3"
)]
pub struct Cli {
    /// Hostname of redis server.
    #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of redis server.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Name of the queue to inspect.
    #[arg(short, long)]
    pub queue: String,

    /// Number of items to print.
    #[arg(short, long, default_value_t = 1)]
    pub items: usize,

    /// Redis database number.
    #[arg(long, default_value_t = 0)]
    pub db: i64,

    /// Connect and read timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Seconds to wait for worker replies when inspecting active tasks.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub reply_timeout: u64,

    /// List every queue with its length before probing.
    #[arg(long)]
    pub list_queues: bool,

    /// Print the queue-age monitoring record of the queue after probing.
    #[arg(long)]
    pub age_state: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl Cli {
    /// Builds the run configuration from the parsed arguments.
    pub fn to_config(&self) -> ProbeConfig {
        ProbeConfig::new(self.queue.clone())
            .with_address(self.host.clone(), self.port)
            .with_db(self.db)
            .with_items(self.items)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_reply_timeout(Duration::from_secs(self.reply_timeout))
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the probe.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the probe with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.to_config();

    let store = RedisStore::connect(&config)
        .await
        .with_context(|| format!("Unable to connect to redis at {}", config.redis_url()))?;
    let mailbox = RedisMailbox::new(
        store.connection(),
        config.db,
        config.reply_timeout,
        config.timeout,
    );

    let mut out = std::io::stdout();

    if cli.list_queues {
        list_queues(&store, &mut out).await?;
    }

    let outcome = probe_queue(&store, &mailbox, &config.queue, config.items, &mut out).await?;

    if cli.age_state {
        print_age_state(&store, &config.queue, &mut out).await?;
    }

    info!(
        queue = %config.queue,
        exit_code = outcome.exit_code(),
        "Run complete"
    );
    Ok(ExitCode::from(outcome.exit_code()))
}
