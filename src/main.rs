use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fleetsync::alert::{AlertSink, LogAlertSink, SlackWebhook};
use fleetsync::cli::{Cli, Command};
use fleetsync::config::{SyncSettings, TransportKind};
use fleetsync::logging;
use fleetsync::store::{ChangeLogStore, OffsetTracker, PathFilter, SqlStore};
use fleetsync::sync::{CoordinatorConfig, SyncCoordinator};
use fleetsync::transfer::{MirrorTransfer, SshOptions, SshTransfer, TransferClient};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;

    let settings = SyncSettings::load(&cli.settings).context("Invalid configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&settings).await,
        Command::Status => status(&settings).await,
        Command::InitSchema => init_schema(&settings).await,
    }
}

async fn connect_store(settings: &SyncSettings) -> Result<Arc<SqlStore>> {
    let store = SqlStore::connect(&settings.database_url, &settings.application_name)
        .await
        .context("Failed to open sync database")?;
    Ok(Arc::new(store))
}

fn build_transfer(settings: &SyncSettings) -> Result<Arc<dyn TransferClient>> {
    match settings.transport {
        TransportKind::Ssh => {
            let transfer = SshTransfer::new(SshOptions {
                user: settings.server_user.clone(),
                connect_timeout: settings.connect_timeout,
                extra_options: settings.ssh_options.clone(),
                ..SshOptions::default()
            })?;
            Ok(Arc::new(transfer))
        }
        TransportKind::Mirror => {
            let root = settings
                .mirror_root
                .clone()
                .context("mirror transport requires --mirror-root")?;
            Ok(Arc::new(MirrorTransfer::new(root)))
        }
    }
}

fn build_alerts(settings: &SyncSettings) -> Result<Arc<dyn AlertSink>> {
    match &settings.alert_webhook {
        Some(url) => {
            let webhook = SlackWebhook::new(url.clone(), settings.application_name.clone())
                .context("Failed to build webhook client")?;
            Ok(Arc::new(webhook))
        }
        None => Ok(Arc::new(LogAlertSink)),
    }
}

async fn run(settings: &SyncSettings) -> Result<()> {
    let started = Instant::now();
    let store = connect_store(settings).await?;

    let coordinator = SyncCoordinator::new(
        CoordinatorConfig::from(settings),
        store.clone(),
        store,
        build_transfer(settings)?,
        build_alerts(settings)?,
    );

    let result = coordinator.run_pass().await?;
    info!(
        host = %settings.local_host,
        previous = result.previous_offset,
        committed = result.final_offset,
        "successfully executed file sync"
    );
    info!(
        host = %settings.local_host,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "time taken for file sync"
    );
    Ok(())
}

async fn status(settings: &SyncSettings) -> Result<()> {
    let store = connect_store(settings).await?;
    let host = settings.local_host.as_str();

    let cursor = store.read_cursor(host).await?;
    let since = cursor.as_ref().map_or(0, |c| c.offset);
    let filter = PathFilter::new(settings.path_filters.iter().cloned());
    let pending = store.query_pending(host, since, &filter).await?;

    match &cursor {
        Some(c) => {
            let updated = c
                .updated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            println!("{}: offset {} (updated {})", host, c.offset, updated);
        }
        None => println!("{}: no cursor yet", host),
    }

    let mut per_host: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &pending {
        *per_host.entry(record.owning_host.as_str()).or_default() += 1;
    }

    if per_host.is_empty() {
        println!("nothing pending");
    }
    for (peer, count) in per_host {
        println!("  {:<32} {} pending", peer, count);
    }
    Ok(())
}

async fn init_schema(settings: &SyncSettings) -> Result<()> {
    let store = connect_store(settings).await?;
    store.ensure_schema().await?;
    info!(
        change_log = store.change_log_table(),
        tracker = store.tracker_table(),
        "schema ready"
    );
    Ok(())
}
