//! Minecraft backup agent - one run per MinecraftBackup Job

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use kube::Client;
use tracing::info;

use minecraft_backup::{KubeLeaseStore, LeaseAcquirer, SystemClock};
use minecraft_backup_agent::{snapshot_world, AgentConfig, RconClient};
use minecraft_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig {
        service_name: "minecraft-backup-agent".to_string(),
        ..Default::default()
    })?;

    let config = AgentConfig::parse();
    info!(
        server = %config.server_name,
        namespace = %config.server_namespace,
        backup = %config.backup_name,
        rcon = %config.rcon_address,
        source = %config.source_dir.display(),
        dest = %config.dest_path.display(),
        "starting backup"
    );

    let client = Client::try_default()
        .await
        .context("connecting to the cluster")?;
    let lease = LeaseAcquirer::new(
        Arc::new(KubeLeaseStore::new(client)),
        Arc::new(SystemClock),
        &config.server_name,
        &config.server_namespace,
        &config.backup_name,
    );

    let deadline = Utc::now()
        + chrono::Duration::from_std(config.lease_deadline()).context("lease deadline")?;
    let holder = lease.acquire(deadline).await?;
    info!(expires_at = %holder.expires_at, "lease acquired");

    // Another owner may have taken an expired lease while we waited.
    lease.revalidate().await?;

    let mut console = RconClient::connect(&config.rcon_address, &config.rcon_password)
        .await
        .with_context(|| format!("connecting to rcon at {}", config.rcon_address))?;
    let archive = config.archive_path();
    let summary = snapshot_world(&mut console, &config.source_dir, &archive).await?;

    info!(
        archive = %archive.display(),
        files = summary.files,
        bytes = summary.bytes,
        "backup complete"
    );
    Ok(())
}
