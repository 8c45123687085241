//! Controller wiring
//!
//! Each `build_*` function returns a boxed future running one controller
//! until a shutdown signal, so `main` can compose them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use minecraft_backup::BackupContext;
use minecraft_common::crd::{MinecraftBackup, MinecraftServer};
use minecraft_common::Error;
use minecraft_server::{ServerContext, TemplateDriftPolicy};

/// Must stay below the client read timeout (30s) so idle watches are closed
/// by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// MinecraftServer controller, re-triggered by changes to its children
///
/// PodMonitors are not watched: their CRD is optional in the cluster.
pub fn build_server_controller(
    client: Client,
    drift_policy: TemplateDriftPolicy,
) -> Result<ControllerFuture, Error> {
    let ctx = Arc::new(ServerContext::from_client(client.clone(), drift_policy)?);
    let servers: Api<MinecraftServer> = Api::all(client.clone());

    tracing::info!(%drift_policy, "- MinecraftServer controller");
    Ok(Box::pin(
        Controller::new(servers, watcher())
            .owns(Api::<ConfigMap>::all(client.clone()), watcher())
            .owns(Api::<Service>::all(client.clone()), watcher())
            .owns(Api::<ReplicaSet>::all(client), watcher())
            .shutdown_on_signal()
            .run(minecraft_server::reconcile, minecraft_server::error_policy, ctx)
            .for_each(log_reconcile_result("MinecraftServer")),
    ))
}

/// MinecraftBackup controller, re-triggered by its Job and RBAC
pub fn build_backup_controller(client: Client, agent_image: String) -> ControllerFuture {
    let ctx = Arc::new(BackupContext::from_client(client.clone(), agent_image));
    let backups: Api<MinecraftBackup> = Api::all(client.clone());

    tracing::info!(image = %ctx.agent_image, "- MinecraftBackup controller");
    Box::pin(
        Controller::new(backups, watcher())
            .owns(Api::<ServiceAccount>::all(client.clone()), watcher())
            .owns(Api::<Role>::all(client.clone()), watcher())
            .owns(Api::<RoleBinding>::all(client.clone()), watcher())
            .owns(Api::<Job>::all(client), watcher())
            .shutdown_on_signal()
            .run(minecraft_backup::reconcile, minecraft_backup::error_policy, ctx)
            .for_each(log_reconcile_result("MinecraftBackup")),
    )
}

/// Creates a closure for logging reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
