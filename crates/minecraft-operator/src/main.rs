//! Minecraft Operator - runs Minecraft servers and their backups on Kubernetes

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kube::Client;
use tracing::{error, info, warn};

use minecraft_backup::compiler::BACKUP_AGENT_IMAGE;
use minecraft_common::telemetry::{init_telemetry, TelemetryConfig};
use minecraft_operator::controllers::{build_backup_controller, build_server_controller};
use minecraft_operator::crds::{crds_yaml, ensure_crds_installed};
use minecraft_operator::health::{serve_probes, Readiness};
use minecraft_operator::leader::LeaderElector;
use minecraft_server::TemplateDriftPolicy;

/// Kubernetes operator for Minecraft servers and their backups
#[derive(Parser, Debug)]
#[command(name = "minecraft-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install CRDs and run the controllers (default)
    Run,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Only run controllers while holding the leader Lease
    #[arg(long, env = "LEADER_ELECT", global = true)]
    leader_elect: bool,

    /// Namespace of the leader Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "minecraft-operator", global = true)]
    leader_namespace: String,

    /// Holder identity for the leader Lease; defaults to the pod hostname
    #[arg(long, env = "POD_NAME", global = true)]
    identity: Option<String>,

    /// What to do when a server's workload template drifts: tolerate or recreate
    #[arg(long, env = "TEMPLATE_DRIFT_POLICY", default_value_t = TemplateDriftPolicy::Tolerate, global = true)]
    template_drift_policy: TemplateDriftPolicy,

    /// Address for /healthz and /readyz
    #[arg(long, env = "PROBE_ADDR", default_value = "0.0.0.0:8081", global = true)]
    probe_addr: SocketAddr,

    /// Image the backup Jobs run
    #[arg(long, env = "BACKUP_AGENT_IMAGE", default_value = BACKUP_AGENT_IMAGE, global = true)]
    backup_agent_image: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let yaml = crds_yaml().context("serializing CRDs")?;
        print!("{yaml}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;
    match cli.command {
        Some(Commands::Run) | None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let readiness = Readiness::default();
    let probes = tokio::spawn(serve_probes(args.probe_addr, readiness.clone()));

    let client = Client::try_default()
        .await
        .context("connecting to the cluster")?;
    ensure_crds_installed(&client).await?;

    let leadership = if args.leader_elect {
        let identity = args
            .identity
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "minecraft-operator".to_string());
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &args.leader_namespace,
            &identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    info!("starting controllers");
    let controllers = vec![
        build_server_controller(client.clone(), args.template_drift_policy)?,
        build_backup_controller(client, args.backup_agent_image),
    ];
    readiness.set_ready(true);
    let all = futures::future::join_all(controllers);

    let result = match leadership {
        Some(mut guard) => {
            let lost = tokio::select! {
                _ = all => false,
                _ = guard.lost() => true,
            };
            readiness.set_ready(false);
            if lost {
                error!("leadership lost, exiting so a standby can take over");
                Err(anyhow::anyhow!("leadership lost"))
            } else {
                if let Err(e) = guard.release().await {
                    warn!(error = %e, "failed to release leadership");
                }
                Ok(())
            }
        }
        None => {
            all.await;
            Ok(())
        }
    };

    probes.abort();
    info!("controllers stopped");
    result
}
