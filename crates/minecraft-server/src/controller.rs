//! MinecraftServer controller
//!
//! One pass fetches the newest persisted server, resolves artifacts, compiles
//! every child, then walks the children in a fixed order. The first child that
//! needs a create, replace or delete gets exactly that one write and the pass
//! returns; the write itself triggers the next pass through the owned-object
//! watch. A pass that finds nothing to do marks the server `Running`.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use minecraft_common::crd::{MinecraftServer, MinecraftServerStatus, PodMonitor, ServerState};
use minecraft_common::{Error, REQUEUE_ERROR, REQUEUE_MUTATED, REQUEUE_SETTLED};
use minecraft_versions::VersionIndexClient;

use crate::artifacts::{resolve_artifacts, PassCache, VersionIndex};
use crate::compiler::{compile, dynmap_name, CompiledServer};
use crate::diff::{
    diff_config_map, diff_pod_monitor, diff_replica_set, diff_service, diff_undesired, Correction,
};
use crate::store::{KubeServerStore, ServerStore};

pub use crate::diff::TemplateDriftPolicy;

/// Shared state for every server reconcile
pub struct ServerContext {
    /// Cluster reads and writes
    pub store: Arc<dyn ServerStore>,
    /// Version index; wrapped in a fresh cache per pass
    pub index: Arc<dyn VersionIndex>,
    /// What to do about drifted workload templates
    pub drift_policy: TemplateDriftPolicy,
}

impl ServerContext {
    /// Create a context from its parts
    pub fn new(
        store: Arc<dyn ServerStore>,
        index: Arc<dyn VersionIndex>,
        drift_policy: TemplateDriftPolicy,
    ) -> Self {
        Self {
            store,
            index,
            drift_policy,
        }
    }

    /// Create a context talking to the cluster and the public version index
    pub fn from_client(client: Client, drift_policy: TemplateDriftPolicy) -> Result<Self, Error> {
        let index = VersionIndexClient::new()
            .map_err(|e| Error::internal_with_context("version-index", e.to_string()))?;
        Ok(Self::new(
            Arc::new(KubeServerStore::new(client)),
            Arc::new(index),
            drift_policy,
        ))
    }

    /// Create a context for testing with the default drift policy
    #[cfg(test)]
    pub fn for_testing(store: Arc<dyn ServerStore>, index: Arc<dyn VersionIndex>) -> Self {
        Self::new(store, index, TemplateDriftPolicy::default())
    }
}

// =============================================================================
// Child kinds
// =============================================================================

/// Store operations for one child kind
#[async_trait]
trait Child: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + Sized {
    async fn fetch(store: &dyn ServerStore, name: &str, namespace: &str)
        -> Result<Option<Self>, Error>;
    async fn create(store: &dyn ServerStore, obj: &Self) -> Result<(), Error>;
    async fn replace(store: &dyn ServerStore, obj: &Self) -> Result<(), Error>;
    async fn delete(store: &dyn ServerStore, name: &str, namespace: &str) -> Result<(), Error>;
}

#[async_trait]
impl Child for ConfigMap {
    async fn fetch(store: &dyn ServerStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_config_map(name, ns).await
    }
    async fn create(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.create_config_map(obj).await
    }
    async fn replace(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.replace_config_map(obj).await
    }
    async fn delete(store: &dyn ServerStore, name: &str, ns: &str) -> Result<(), Error> {
        store.delete_config_map(name, ns).await
    }
}

#[async_trait]
impl Child for Service {
    async fn fetch(store: &dyn ServerStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_service(name, ns).await
    }
    async fn create(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.create_service(obj).await
    }
    async fn replace(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.replace_service(obj).await
    }
    async fn delete(store: &dyn ServerStore, name: &str, ns: &str) -> Result<(), Error> {
        store.delete_service(name, ns).await
    }
}

#[async_trait]
impl Child for ReplicaSet {
    async fn fetch(store: &dyn ServerStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_replica_set(name, ns).await
    }
    async fn create(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.create_replica_set(obj).await
    }
    async fn replace(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.replace_replica_set(obj).await
    }
    async fn delete(store: &dyn ServerStore, name: &str, ns: &str) -> Result<(), Error> {
        store.delete_replica_set(name, ns).await
    }
}

#[async_trait]
impl Child for PodMonitor {
    async fn fetch(store: &dyn ServerStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_pod_monitor(name, ns).await
    }
    async fn create(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.create_pod_monitor(obj).await
    }
    async fn replace(store: &dyn ServerStore, obj: &Self) -> Result<(), Error> {
        store.replace_pod_monitor(obj).await
    }
    async fn delete(store: &dyn ServerStore, name: &str, ns: &str) -> Result<(), Error> {
        store.delete_pod_monitor(name, ns).await
    }
}

/// Description of the single write a pass applied
type Mutation = String;

/// Bring one desired child in line, applying at most one write
async fn converge<K: Child>(
    store: &dyn ServerStore,
    expected: &K,
    diff: impl FnOnce(&K, &K) -> Correction<K> + Send,
) -> Result<Option<Mutation>, Error> {
    let kind = K::kind(&());
    let name = expected.name_any();
    let namespace = expected.namespace().unwrap_or_default();

    let Some(actual) = K::fetch(store, &name, &namespace).await? else {
        info!(%kind, %name, "creating");
        K::create(store, expected).await?;
        return Ok(Some(format!("created {kind}/{name}")));
    };

    match diff(expected, &actual) {
        Correction::InSync => Ok(None),
        Correction::Tolerated { drifted } => {
            warn!(%kind, %name, ?drifted, "drift left in place by template drift policy");
            Ok(None)
        }
        Correction::Update { object, changed } => {
            info!(%kind, %name, ?changed, "correcting drift");
            K::replace(store, &object).await?;
            Ok(Some(format!("updated {kind}/{name}")))
        }
        Correction::Delete { reason } => {
            info!(%kind, %name, %reason, "deleting");
            K::delete(store, &name, &namespace).await?;
            Ok(Some(format!("deleted {kind}/{name}")))
        }
    }
}

/// Delete a child the spec no longer asks for
async fn converge_absent<K: Child>(
    store: &dyn ServerStore,
    name: &str,
    namespace: &str,
    reason: &str,
) -> Result<Option<Mutation>, Error> {
    let actual = K::fetch(store, name, namespace).await?;
    match diff_undesired(actual.as_ref(), reason) {
        Correction::Delete { reason } => {
            let kind = K::kind(&());
            info!(%kind, %name, %reason, "deleting");
            K::delete(store, name, namespace).await?;
            Ok(Some(format!("deleted {kind}/{name}")))
        }
        _ => Ok(None),
    }
}

/// Walk every child in order and stop at the first write
async fn converge_children(
    ctx: &ServerContext,
    server_name: &str,
    namespace: &str,
    compiled: &CompiledServer,
) -> Result<Option<Mutation>, Error> {
    let store = ctx.store.as_ref();

    if let Some(m) = converge(store, &compiled.config_map, diff_config_map).await? {
        return Ok(Some(m));
    }

    match &compiled.dynmap {
        Some(dynmap) => {
            if let Some(m) = converge(store, &dynmap.config_map, diff_config_map).await? {
                return Ok(Some(m));
            }
            if let Some(m) = converge(store, &dynmap.service, diff_service).await? {
                return Ok(Some(m));
            }
        }
        None => {
            let name = dynmap_name(server_name);
            let reason = "map rendering disabled";
            if let Some(m) = converge_absent::<ConfigMap>(store, &name, namespace, reason).await? {
                return Ok(Some(m));
            }
            if let Some(m) = converge_absent::<Service>(store, &name, namespace, reason).await? {
                return Ok(Some(m));
            }
        }
    }

    let primary = match &compiled.service {
        Some(service) => converge(store, service, diff_service).await?,
        None => {
            converge_absent::<Service>(store, server_name, namespace, "no primary service requested")
                .await?
        }
    };
    if primary.is_some() {
        return Ok(primary);
    }

    if let Some(m) = converge(store, &compiled.rcon_service, diff_service).await? {
        return Ok(Some(m));
    }

    let monitor = match &compiled.pod_monitor {
        Some(pm) => converge(store, pm, diff_pod_monitor).await?,
        None => {
            converge_absent::<PodMonitor>(store, server_name, namespace, "monitoring disabled")
                .await?
        }
    };
    if monitor.is_some() {
        return Ok(monitor);
    }

    let policy = ctx.drift_policy;
    converge(store, &compiled.replica_set, |expected, actual| {
        diff_replica_set(expected, actual, policy)
    })
    .await
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a MinecraftServer
///
/// Returns after at most one child write. Compilation failures mark the server
/// `Error` before the error is returned to the error policy.
#[instrument(skip(server, ctx), fields(server = %server.name_any()))]
pub async fn reconcile(
    server: Arc<MinecraftServer>,
    ctx: Arc<ServerContext>,
) -> Result<Action, Error> {
    let name = server.name_any();
    let namespace = server.namespace().ok_or_else(|| {
        Error::internal_with_context("reconciler", format!("server {name} has no namespace"))
    })?;

    // The watch cache may lag behind; work from the newest persisted spec
    let Some(server) = ctx.store.get_server(&name, &namespace).await? else {
        debug!("server no longer exists");
        return Ok(Action::await_change());
    };
    if server.metadata.deletion_timestamp.is_some() {
        debug!("server is being deleted, children follow through garbage collection");
        return Ok(Action::await_change());
    }

    let cache = PassCache::new(ctx.index.clone());
    let compiled = match compile_pass(&server, &cache).await {
        Ok(compiled) => compiled,
        Err(e) if e.is_compilation() => {
            warn!(error = %e, "server spec could not be compiled");
            update_status(&ctx, &server, ServerState::Error, Some(e.to_string())).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    match converge_children(&ctx, &name, &namespace, &compiled).await? {
        Some(mutation) => {
            debug!(%mutation, "pass applied a mutation");
            Ok(Action::requeue(REQUEUE_MUTATED))
        }
        None => {
            update_status(&ctx, &server, ServerState::Running, None).await?;
            debug!("server settled");
            Ok(Action::requeue(REQUEUE_SETTLED))
        }
    }
}

async fn compile_pass(
    server: &MinecraftServer,
    index: &dyn VersionIndex,
) -> Result<CompiledServer, Error> {
    let artifacts = resolve_artifacts(server, index).await?;
    compile(server, &artifacts)
}

/// Patch status only when it differs from what is persisted
async fn update_status(
    ctx: &ServerContext,
    server: &MinecraftServer,
    state: ServerState,
    message: Option<String>,
) -> Result<(), Error> {
    let status = MinecraftServerStatus {
        state,
        message,
        observed_generation: server.metadata.generation,
    };
    if server.status.as_ref() == Some(&status) {
        debug!(%state, "status unchanged, skipping update");
        return Ok(());
    }

    info!(%state, "updating server status");
    ctx.store
        .patch_server_status(
            &server.name_any(),
            &server.namespace().unwrap_or_default(),
            &status,
        )
        .await
}

/// Error policy for the server controller
///
/// Retryable errors (store hiccups, conflicts, upstream outages) requeue with
/// a fixed delay; anything else waits for the server to change.
pub fn error_policy(server: Arc<MinecraftServer>, error: &Error, _ctx: Arc<ServerContext>) -> Action {
    error!(
        ?error,
        server = %server.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(REQUEUE_ERROR)
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::artifacts::MockVersionIndex;
    use crate::compiler::files;
    use crate::compiler::tests::server_with;
    use crate::store::memory::MemoryStore;
    use crate::store::MockServerStore;
    use minecraft_common::crd::{
        AccessMode, ForgeSpec, MinecraftServerSpec, MonitoringSpec, MonitoringType, Player,
        ServerServiceSpec, ServerType, ServiceType,
    };
    use minecraft_versions::{Artifact, VersionError};

    fn paper_spec() -> MinecraftServerSpec {
        MinecraftServerSpec {
            minecraft_version: "1.18.2".to_string(),
            ..Default::default()
        }
    }

    fn index() -> Arc<MockVersionIndex> {
        let mut index = MockVersionIndex::new();
        index
            .expect_resolve_version()
            .returning(|v| Ok(v.to_string()));
        index.expect_latest_paper_build().returning(|_| Ok(388));
        index.expect_paper_download().returning(|v, b| {
            Ok(Artifact {
                url: format!("https://api.papermc.io/v2/projects/paper/versions/{v}/builds/{b}/downloads/paper-{v}-{b}.jar"),
                sha256: "abc123".to_string(),
            })
        });
        Arc::new(index)
    }

    fn setup(spec: MinecraftServerSpec) -> (Arc<MemoryStore>, Arc<ServerContext>) {
        let store = Arc::new(MemoryStore::with_server(server_with(spec)));
        let ctx = Arc::new(ServerContext::for_testing(store.clone(), index()));
        (store, ctx)
    }

    fn current(store: &MemoryStore) -> Arc<MinecraftServer> {
        Arc::new(
            store
                .servers
                .lock()
                .get("survival")
                .cloned()
                .expect("server"),
        )
    }

    async fn pass(store: &MemoryStore, ctx: &Arc<ServerContext>) -> Result<Action, Error> {
        reconcile(current(store), ctx.clone()).await
    }

    /// Run passes until one applies no child write; returns the writes per pass
    async fn settle(store: &MemoryStore, ctx: &Arc<ServerContext>) -> Vec<Vec<String>> {
        let mut passes = Vec::new();
        for _ in 0..20 {
            store.clear_writes();
            let action = pass(store, ctx).await.expect("reconcile");
            passes.push(store.writes());
            if action == Action::requeue(REQUEUE_SETTLED) {
                return passes;
            }
        }
        panic!("server did not settle: {passes:?}");
    }

    fn update_spec(store: &MemoryStore, f: impl FnOnce(&mut MinecraftServerSpec)) {
        let mut servers = store.servers.lock();
        let server = servers.get_mut("survival").expect("server");
        f(&mut server.spec);
        server.metadata.generation = Some(server.metadata.generation.unwrap_or(1) + 1);
    }

    // =========================================================================
    // Convergence stories
    // =========================================================================

    /// Story: a fresh server converges one child per pass, then settles Running
    #[tokio::test]
    async fn story_fresh_server_converges_one_write_per_pass() {
        let (store, ctx) = setup(paper_spec());

        let passes = settle(&store, &ctx).await;
        assert_eq!(
            passes,
            vec![
                vec!["create ConfigMap/survival".to_string()],
                vec!["create Service/survival-rcon".to_string()],
                vec!["create ReplicaSet/survival".to_string()],
                vec!["patch-status MinecraftServer/survival".to_string()],
            ]
        );
        assert_eq!(
            store.status("survival").map(|s| s.state),
            Some(ServerState::Running)
        );
    }

    /// Story: a second pass with nothing changed in between writes nothing
    #[tokio::test]
    async fn story_settled_server_is_idempotent() {
        let (store, ctx) = setup(paper_spec());
        settle(&store, &ctx).await;

        store.clear_writes();
        let action = pass(&store, &ctx).await.expect("reconcile");
        assert_eq!(action, Action::requeue(REQUEUE_SETTLED));
        assert!(store.writes().is_empty());
    }

    /// Story: switching to allow-list access rewrites only the config bundle
    #[tokio::test]
    async fn story_allow_list_updates_only_the_bundle() {
        let (store, ctx) = setup(paper_spec());
        settle(&store, &ctx).await;

        update_spec(&store, |spec| {
            spec.access_mode = AccessMode::AllowListOnly;
            spec.allow_list = vec![Player {
                name: "Alice".to_string(),
                uuid: "0f3b6e1c-0000-4000-8000-000000000001".to_string(),
            }];
        });

        let passes = settle(&store, &ctx).await;
        assert_eq!(
            passes,
            vec![
                vec!["replace ConfigMap/survival".to_string()],
                vec!["patch-status MinecraftServer/survival".to_string()],
            ]
        );

        let bundle = store.config_maps.lock().get("survival").cloned().expect("bundle");
        let data = bundle.data.expect("data");
        assert!(data[files::SERVER_PROPERTIES].contains("white-list=true"));
        assert!(data[files::SERVER_PROPERTIES].contains("enforce-whitelist=true"));
        assert!(data[files::WHITELIST].contains("Alice"));
        assert_eq!(store.status("survival").and_then(|s| s.observed_generation), Some(2));
    }

    /// Story: a primary endpoint is deleted once the spec stops asking for it
    #[tokio::test]
    async fn story_undesired_primary_endpoint_is_deleted() {
        let (store, ctx) = setup(MinecraftServerSpec {
            service: Some(ServerServiceSpec {
                service_type: ServiceType::NodePort,
                minecraft_node_port: Some(30565),
            }),
            ..paper_spec()
        });
        settle(&store, &ctx).await;
        assert!(store.services.lock().contains_key("survival"));

        update_spec(&store, |spec| {
            if let Some(service) = spec.service.as_mut() {
                service.service_type = ServiceType::None;
            }
        });
        let passes = settle(&store, &ctx).await;
        assert_eq!(passes[0], vec!["delete Service/survival".to_string()]);
        assert!(!store.services.lock().contains_key("survival"));
        assert!(store.services.lock().contains_key("survival-rcon"));
    }

    /// Story: turning monitoring off removes the PodMonitor
    #[tokio::test]
    async fn story_disabling_monitoring_deletes_the_pod_monitor() {
        let (store, ctx) = setup(MinecraftServerSpec {
            monitoring: Some(MonitoringSpec {
                monitoring_type: MonitoringType::PrometheusServiceMonitor,
            }),
            ..paper_spec()
        });
        settle(&store, &ctx).await;
        assert!(store.pod_monitors.lock().contains_key("survival"));

        update_spec(&store, |spec| spec.monitoring = None);
        let passes = settle(&store, &ctx).await;
        assert!(passes
            .iter()
            .flatten()
            .any(|w| w == "delete PodMonitor/survival"));
        assert!(store.pod_monitors.lock().is_empty());
    }

    /// Story: labels added by someone else never trigger a write
    #[tokio::test]
    async fn story_foreign_labels_are_tolerated() {
        let (store, ctx) = setup(paper_spec());
        settle(&store, &ctx).await;

        for svc in store.services.lock().values_mut() {
            svc.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("team".to_string(), "infra".to_string());
        }
        store.clear_writes();
        pass(&store, &ctx).await.expect("reconcile");
        assert!(store.writes().is_empty());
    }

    /// Story: N independent drifts take N passes, one write each
    #[tokio::test]
    async fn story_independent_drifts_are_fixed_one_per_pass() {
        let (store, ctx) = setup(paper_spec());
        settle(&store, &ctx).await;

        if let Some(cm) = store.config_maps.lock().get_mut("survival") {
            cm.metadata.owner_references = None;
            cm.data
                .get_or_insert_with(BTreeMap::new)
                .insert("notes.txt".to_string(), "edited".to_string());
        }
        if let Some(svc) = store.services.lock().get_mut("survival-rcon") {
            svc.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("minecraft".to_string(), "creative".to_string());
        }

        let passes = settle(&store, &ctx).await;
        assert_eq!(
            passes,
            vec![
                vec!["replace ConfigMap/survival".to_string()],
                vec!["replace ConfigMap/survival".to_string()],
                vec!["replace Service/survival-rcon".to_string()],
                vec![],
            ]
        );

        let cm = store.config_maps.lock().get("survival").cloned().expect("cm");
        assert!(cm.metadata.owner_references.is_some());
        assert!(!cm.data.expect("data").contains_key("notes.txt"));
    }

    /// Story: workload template drift is only logged under the default policy
    #[tokio::test]
    async fn story_template_drift_is_tolerated_by_default() {
        let (store, ctx) = setup(paper_spec());
        settle(&store, &ctx).await;

        drift_workload_image(&store);
        store.clear_writes();
        let action = pass(&store, &ctx).await.expect("reconcile");
        assert_eq!(action, Action::requeue(REQUEUE_SETTLED));
        assert!(store.writes().is_empty());
    }

    /// Story: under Recreate a drifted workload is deleted and rebuilt
    #[tokio::test]
    async fn story_template_drift_recreates_under_recreate_policy() {
        let store = Arc::new(MemoryStore::with_server(server_with(paper_spec())));
        let ctx = Arc::new(ServerContext::new(
            store.clone(),
            index(),
            TemplateDriftPolicy::Recreate,
        ));
        settle(&store, &ctx).await;

        drift_workload_image(&store);
        let passes = settle(&store, &ctx).await;
        assert_eq!(
            passes,
            vec![
                vec!["delete ReplicaSet/survival".to_string()],
                vec!["create ReplicaSet/survival".to_string()],
                vec![],
            ]
        );
    }

    fn drift_workload_image(store: &MemoryStore) {
        let mut replica_sets = store.replica_sets.lock();
        let rs = replica_sets.get_mut("survival").expect("rs");
        let pod = rs
            .spec
            .as_mut()
            .and_then(|s| s.template.as_mut())
            .and_then(|t| t.spec.as_mut())
            .expect("pod spec");
        pod.containers[0].image = Some("itzg/minecraft-server:latest".to_string());
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    /// Story: an index outage marks the server Error and is retried
    #[tokio::test]
    async fn story_upstream_outage_sets_error_status() {
        let store = Arc::new(MemoryStore::with_server(server_with(paper_spec())));
        let mut index = MockVersionIndex::new();
        index
            .expect_resolve_version()
            .returning(|v| Ok(v.to_string()));
        index.expect_latest_paper_build().returning(|v| {
            Err(VersionError::NoBuilds {
                version: v.to_string(),
            })
        });
        let ctx = Arc::new(ServerContext::for_testing(store.clone(), Arc::new(index)));

        let err = pass(&store, &ctx).await.expect_err("compilation error");
        assert!(err.is_retryable());
        let status = store.status("survival").expect("status");
        assert_eq!(status.state, ServerState::Error);
        assert!(status.message.is_some());
        // Nothing was created from a spec that failed to compile
        assert!(store.config_maps.lock().is_empty());
        assert_eq!(
            error_policy(current(&store), &err, ctx),
            Action::requeue(REQUEUE_ERROR)
        );
    }

    #[tokio::test]
    async fn spec_gap_waits_for_a_change() {
        let (store, ctx) = setup(MinecraftServerSpec {
            server_type: ServerType::Forge,
            forge: None,
            ..paper_spec()
        });

        let err = pass(&store, &ctx).await.expect_err("missing forge settings");
        assert!(!err.is_retryable());
        assert_eq!(
            store.status("survival").map(|s| s.state),
            Some(ServerState::Error)
        );
        assert_eq!(error_policy(current(&store), &err, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn error_status_is_not_rewritten_when_unchanged() {
        let (store, ctx) = setup(MinecraftServerSpec {
            server_type: ServerType::Forge,
            forge: None,
            ..paper_spec()
        });
        let _ = pass(&store, &ctx).await;
        store.clear_writes();
        let _ = pass(&store, &ctx).await;
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn forge_server_converges() {
        let (store, ctx) = setup(MinecraftServerSpec {
            server_type: ServerType::Forge,
            forge: Some(ForgeSpec {
                forge_version: "40.1.80".to_string(),
                forge_installer_sha256_sum: "f00d".to_string(),
                modpack_zip_url: "https://example.com/pack.zip".to_string(),
                modpack_zip_sha256_sum: "beef".to_string(),
            }),
            ..paper_spec()
        });
        settle(&store, &ctx).await;
        assert!(store.replica_sets.lock().contains_key("survival"));
    }

    #[tokio::test]
    async fn deleted_server_is_left_alone() {
        let store = Arc::new(MemoryStore::default());
        let ctx = Arc::new(ServerContext::for_testing(store.clone(), index()));

        let action = reconcile(Arc::new(server_with(paper_spec())), ctx)
            .await
            .expect("reconcile");
        assert_eq!(action, Action::await_change());
        assert!(store.writes().is_empty());
    }

    /// Story: losing a write race surfaces as a retryable conflict
    #[tokio::test]
    async fn story_conflicting_write_is_retried() {
        let server = server_with(paper_spec());
        let mut live = crate::compiler::compile(
            &server,
            &crate::compiler::tests::paper_artifacts(),
        )
        .expect("compile")
        .config_map;
        live.data = None;

        let mut store = MockServerStore::new();
        let fetched = server.clone();
        store
            .expect_get_server()
            .returning(move |_, _| Ok(Some(fetched.clone())));
        store
            .expect_get_config_map()
            .returning(move |_, _| Ok(Some(live.clone())));
        store
            .expect_replace_config_map()
            .times(1)
            .returning(|cm| Err(Error::conflict("ConfigMap", cm.name_any())));
        store.expect_patch_server_status().never();

        let ctx = Arc::new(ServerContext::for_testing(Arc::new(store), index()));
        let err = reconcile(Arc::new(server), ctx.clone())
            .await
            .expect_err("conflict");
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(
            error_policy(Arc::new(server_with(paper_spec())), &err, ctx),
            Action::requeue(REQUEUE_ERROR)
        );
    }
}
