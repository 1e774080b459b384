//! postflow-send - Background daemon for scheduled publication
//!
//! Owns the scheduler: polls the queue, hands due posts to the configured
//! publisher command and records each outcome.

use clap::Parser;
use libpostflow::error::ConfigError;
use libpostflow::logging::{LogFormat, LoggingConfig};
use libpostflow::publisher::CommandPublisher;
use libpostflow::{Config, Database, PostflowError, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "postflow-send")]
#[command(version)]
#[command(about = "Background daemon that publishes scheduled posts")]
#[command(long_about = "\
postflow-send - Background daemon that publishes scheduled posts

DESCRIPTION:
    postflow-send polls the Postflow database for scheduled posts whose time
    has come and publishes them through the configured publisher command.
    Each post ends up either published (with its remote id) or failed (with
    the publisher's error message). Failed posts can be queued again with
    `postflow-queue retry`.

    On startup, posts left in `processing` by an interrupted run are marked
    failed and audit entries older than the retention horizon are removed.

USAGE:
    # Run in foreground (logs to stderr)
    postflow-send

    # Check every 30 seconds
    postflow-send --poll-interval 30

    # Run a single check and print the summary as JSON
    postflow-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the post in flight)

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml
    Database location: ~/.local/share/postflow/posts.db

    [scheduler]
    poll_interval = 60     # seconds between checks
    publish_pause = 2      # seconds between two posts
    stop_timeout = 5       # seconds to wait for the loop on shutdown

    [publisher]
    command = \"/usr/local/bin/publish\"   # receives the media path as last
    args = []                             # argument, the caption on stdin,
    timeout = 300                         # and prints the remote id

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
    3 - Invalid arguments
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Run one check, print the summary as JSON and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty (overrides POSTFLOW_LOG_FORMAT)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PostflowError>()
            .map_or(1, PostflowError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    let publisher = CommandPublisher::from_config(&config).ok_or_else(|| {
        PostflowError::from(ConfigError::MissingField("publisher.command".to_string()))
    })?;

    let mut scheduler_config = SchedulerConfig::from(&config.scheduler);
    scheduler_config.publish_timeout = config.publish_timeout();
    if let Some(secs) = cli.poll_interval {
        if secs == 0 {
            return Err(PostflowError::InvalidInput(
                "--poll-interval must be at least 1 second".to_string(),
            )
            .into());
        }
        scheduler_config.poll_interval = Duration::from_secs(secs);
    }

    let db = Database::new(&config.db_path()).await?;
    let scheduler = Scheduler::new(db.clone(), Arc::new(publisher), scheduler_config);

    let recovered = scheduler.recover_stranded().await?;
    if recovered > 0 {
        warn!(recovered, "Marked posts interrupted by a previous run as failed");
    }
    db.cleanup_activity(config.activity.retention_days).await?;

    if cli.once {
        let summary = scheduler.manual_check().await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        db.close().await;
        if let Some(error) = summary.error {
            return Err(PostflowError::CheckAborted(error).into());
        }
        return Ok(());
    }

    let shutdown = Arc::new(Notify::new());
    setup_signal_handlers(Arc::clone(&shutdown))?;

    info!(
        poll_interval_secs = scheduler.config().poll_interval.as_secs(),
        "postflow-send starting"
    );
    scheduler.start();

    shutdown.notified().await;
    info!("Shutdown requested, stopping scheduler");
    scheduler.stop().await;
    db.close().await;

    info!("postflow-send stopped");
    Ok(())
}

/// Wake `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<Notify>) -> anyhow::Result<()> {
    use anyhow::Context;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Received shutdown signal");
            shutdown.notify_one();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<Notify>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            shutdown.notify_one();
        }
    });

    Ok(())
}
