//! Scheduled publication daemon.
//!
//! ```bash
//! update-revisions --data-dir /var/lib/updates --sweep-interval-secs 30
//! UPDATE_REVISIONS_DATA=/var/lib/updates update-revisions --once
//! ```

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use update_revisions::config::{Cli, LogFormat};
use update_revisions::{RevisionEngine, SchedulePublisher, SledRevisionStore, TimeStamp};

fn init_logging(cli: &Cli) {
    let env_filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = cli.publisher_config()?;
    let store = SledRevisionStore::open(&cli.data_dir)
        .with_context(|| format!("failed to open store at {}", cli.data_dir.display()))?;
    let engine = Arc::new(RevisionEngine::new(Arc::new(store)));
    let publisher = SchedulePublisher::new(engine, config);

    info!(
        data_dir = %cli.data_dir.display(),
        batch_size = config.batch_size,
        interval_secs = config.interval.as_secs(),
        once = cli.once,
        "starting scheduled publisher"
    );

    if cli.once {
        publisher
            .publish_due_scheduled_updates(TimeStamp::now())
            .context("scheduled sweep failed")?;
        return Ok(());
    }

    loop {
        // a failed sweep is retried on the next tick
        if let Err(e) = publisher.publish_due_scheduled_updates(TimeStamp::now()) {
            error!(error = %e, "scheduled sweep failed");
        }
        thread::sleep(config.interval);
    }
}
