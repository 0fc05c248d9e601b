//! backup-worker: consumes backup jobs from RabbitMQ, copies device
//! configurations over SSH/SCP and reports results to the control API.
//!
//! All settings come from the environment (optionally a `.env` file).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tracing::info;

use netbackup_backup::{ArtifactStore, BackupExecutor, SshTransport};
use netbackup_core::config::{load_dotenv, load_env_file};
use netbackup_core::{Config, DeviceKind};
use netbackup_notify::ApiStatusReporter;
use netbackup_queue::AmqpConnector;
use netbackup_worker::shutdown::os_signal;
use netbackup_worker::telemetry::init_tracing;
use netbackup_worker::{FixedDelay, QueueConsumer};

// ── CLI ─────────────────────────────────────────────────────────────

/// Unattended network device configuration backups.
#[derive(Parser, Debug)]
#[command(name = "backup-worker", version, about)]
struct Cli {
    /// Load settings from this env file instead of `./.env`.
    #[arg(long, env = "NETBACKUP_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Validate configuration, print a summary and exit.
    #[arg(long)]
    check_config: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => load_env_file(path)?,
        None => load_dotenv(),
    }
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log).context("cannot initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting backup worker");

    config.validate().context("invalid configuration")?;
    config.log_summary();

    if cli.check_config {
        info!("configuration OK");
        return Ok(());
    }

    let store = ArtifactStore::open(&config.device.backup_dir).with_context(|| {
        format!(
            "cannot create backup directory {}",
            config.device.backup_dir.display()
        )
    })?;
    info!(dir = %store.dir().display(), "Backup manager initialized");

    let transport = SshTransport::new(
        config.device.ssh_port,
        config.device.connect_timeout,
        config.device.banner_timeout,
        config.device.transfer_timeout,
    );
    let executor = BackupExecutor::new(
        transport,
        config.device.credentials()?,
        store,
        config.device.remote_path.clone(),
    );

    let reporter = ApiStatusReporter::new(&config.api.host, config.api.timeout)
        .context("invalid control API settings")?;
    let connector = AmqpConnector::new(&config.broker);

    let consumer = QueueConsumer::builder(Arc::new(connector), Arc::new(reporter))
        .device(DeviceKind::Ubnt, Arc::new(executor))
        .process_delay(config.worker.process_delay)
        .reconnect_policy(FixedDelay(config.worker.reconnect_delay))
        .build();

    let shutdown = Arc::new(Notify::new());
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        os_signal().await;
        info!("shutdown signal received, finishing current job");
        signal_shutdown.notify_one();
    });

    consumer.run(shutdown).await;

    let stats = consumer.stats().snapshot();
    info!(
        acked = stats.acked,
        rejected = stats.rejected,
        reconnects = stats.connection_losses,
        "backup-worker exited cleanly"
    );
    Ok(())
}
