//! MinecraftBackup controller
//!
//! A backup moves from no status to `Pending` in its own pass, then gets its
//! RBAC and Job one write per pass, and finally mirrors the Job's outcome.
//! `Complete` and `Failed` are terminal: once recorded, nothing else happens.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use minecraft_common::crd::{BackupState, MinecraftBackup, MinecraftBackupStatus};
use minecraft_common::{Error, REQUEUE_ERROR, REQUEUE_MUTATED, REQUEUE_SETTLED};
use minecraft_server::diff::{diff_metadata, Correction};

use crate::compiler::{
    compile_job, compile_role, compile_role_binding, compile_service_account, BackupIdentity,
    BACKUP_AGENT_IMAGE,
};
use crate::store::{BackupStore, KubeBackupStore};

/// Shared state for every backup reconcile
pub struct BackupContext {
    /// Cluster reads and writes
    pub store: Arc<dyn BackupStore>,
    /// Image the agent Job runs
    pub agent_image: String,
}

impl BackupContext {
    /// Create a context from its parts
    pub fn new(store: Arc<dyn BackupStore>, agent_image: impl Into<String>) -> Self {
        Self {
            store,
            agent_image: agent_image.into(),
        }
    }

    /// Create a context talking to the cluster
    pub fn from_client(client: Client, agent_image: impl Into<String>) -> Self {
        Self::new(Arc::new(KubeBackupStore::new(client)), agent_image)
    }

    /// Create a context for testing with the default agent image
    #[cfg(test)]
    pub fn for_testing(store: Arc<dyn BackupStore>) -> Self {
        Self::new(store, BACKUP_AGENT_IMAGE)
    }
}

/// Store operations for one child kind
#[async_trait]
trait Child: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + Sized {
    async fn fetch(store: &dyn BackupStore, name: &str, namespace: &str)
        -> Result<Option<Self>, Error>;
    async fn create(store: &dyn BackupStore, obj: &Self) -> Result<(), Error>;
    async fn replace(store: &dyn BackupStore, obj: &Self) -> Result<(), Error>;
}

#[async_trait]
impl Child for ServiceAccount {
    async fn fetch(store: &dyn BackupStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_service_account(name, ns).await
    }
    async fn create(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.create_service_account(obj).await
    }
    async fn replace(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.replace_service_account(obj).await
    }
}

#[async_trait]
impl Child for Role {
    async fn fetch(store: &dyn BackupStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_role(name, ns).await
    }
    async fn create(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.create_role(obj).await
    }
    async fn replace(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.replace_role(obj).await
    }
}

#[async_trait]
impl Child for RoleBinding {
    async fn fetch(store: &dyn BackupStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_role_binding(name, ns).await
    }
    async fn create(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.create_role_binding(obj).await
    }
    async fn replace(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.replace_role_binding(obj).await
    }
}

#[async_trait]
impl Child for Job {
    async fn fetch(store: &dyn BackupStore, name: &str, ns: &str) -> Result<Option<Self>, Error> {
        store.get_job(name, ns).await
    }
    async fn create(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.create_job(obj).await
    }
    async fn replace(store: &dyn BackupStore, obj: &Self) -> Result<(), Error> {
        store.replace_job(obj).await
    }
}

/// Where one child stands after converging it
enum Converged<K> {
    /// A create or replace was applied
    Mutated,
    /// The live object matches
    Live(K),
}

async fn converge<K: Child>(
    store: &dyn BackupStore,
    expected: &K,
    diff: impl FnOnce(&K, &K) -> Correction<K> + Send,
) -> Result<Converged<K>, Error> {
    let kind = K::kind(&());
    let name = expected.name_any();
    let namespace = expected.namespace().unwrap_or_default();

    let Some(actual) = K::fetch(store, &name, &namespace).await? else {
        info!(%kind, %name, "creating");
        K::create(store, expected).await?;
        return Ok(Converged::Mutated);
    };

    match diff(expected, &actual) {
        Correction::Update { object, changed } => {
            info!(%kind, %name, ?changed, "correcting drift");
            K::replace(store, &object).await?;
            Ok(Converged::Mutated)
        }
        Correction::Delete { reason } => Err(Error::internal_with_context(
            "backup-controller",
            format!("unexpected delete of {kind} {name}: {reason}"),
        )),
        Correction::InSync | Correction::Tolerated { .. } => Ok(Converged::Live(actual)),
    }
}

/// Role: ownership and labels, then the exact rule set
fn diff_role(expected: &Role, actual: &Role) -> Correction<Role> {
    match diff_metadata(expected, actual) {
        Correction::InSync if expected.rules != actual.rules => {
            let mut object = actual.clone();
            object.rules = expected.rules.clone();
            Correction::Update {
                object,
                changed: vec!["rules".to_string()],
            }
        }
        other => other,
    }
}

/// Outcome recorded by a finished Job, if it finished
fn job_outcome(job: &Job) -> Option<BackupState> {
    let status = job.status.as_ref()?;
    if status.failed.unwrap_or(0) > 0 {
        Some(BackupState::Failed)
    } else if status.succeeded.unwrap_or(0) > 0 {
        Some(BackupState::Complete)
    } else {
        None
    }
}

/// Reconcile a MinecraftBackup
#[instrument(skip(backup, ctx), fields(backup = %backup.name_any()))]
pub async fn reconcile(
    backup: Arc<MinecraftBackup>,
    ctx: Arc<BackupContext>,
) -> Result<Action, Error> {
    let name = backup.name_any();
    let namespace = backup.namespace().ok_or_else(|| {
        Error::internal_with_context("reconciler", format!("backup {name} has no namespace"))
    })?;
    let store = ctx.store.as_ref();

    let Some(backup) = store.get_backup(&name, &namespace).await? else {
        debug!("backup no longer exists");
        return Ok(Action::await_change());
    };

    match backup.state() {
        None => {
            update_status(store, &backup, BackupState::Pending, None).await?;
            return Ok(Action::requeue(REQUEUE_MUTATED));
        }
        Some(state) if state.is_terminal() => {
            debug!(%state, "backup finished");
            return Ok(Action::await_change());
        }
        Some(_) => {}
    }

    let id = BackupIdentity::of(&backup)?;
    let server_name = backup.spec.server.name.clone();

    if let Converged::Mutated = converge(store, &compile_service_account(&id), diff_metadata).await? {
        return Ok(Action::requeue(REQUEUE_MUTATED));
    }
    if let Converged::Mutated = converge(store, &compile_role(&id, &server_name), diff_role).await? {
        return Ok(Action::requeue(REQUEUE_MUTATED));
    }
    if let Converged::Mutated = converge(store, &compile_role_binding(&id), diff_metadata).await? {
        return Ok(Action::requeue(REQUEUE_MUTATED));
    }

    let Some(server) = store.get_server(&server_name, &namespace).await? else {
        warn!(server = %server_name, "target server does not exist");
        update_status(
            store,
            &backup,
            BackupState::Failed,
            Some(format!("server {server_name} not found")),
        )
        .await?;
        return Ok(Action::await_change());
    };

    let job = match compile_job(&id, &backup, &server, &ctx.agent_image) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "backup job could not be compiled");
            update_status(store, &backup, BackupState::Pending, Some(e.to_string())).await?;
            return Err(e);
        }
    };

    let live = match converge(store, &job, diff_metadata).await? {
        Converged::Mutated => return Ok(Action::requeue(REQUEUE_MUTATED)),
        Converged::Live(live) => live,
    };

    match job_outcome(&live) {
        Some(outcome) => {
            info!(%outcome, "backup job finished");
            update_status(store, &backup, outcome, None).await?;
            Ok(Action::await_change())
        }
        None => {
            debug!("backup job still running");
            Ok(Action::requeue(REQUEUE_SETTLED))
        }
    }
}

/// Patch status only when it differs from what is persisted
async fn update_status(
    store: &dyn BackupStore,
    backup: &MinecraftBackup,
    state: BackupState,
    message: Option<String>,
) -> Result<(), Error> {
    let status = MinecraftBackupStatus {
        state: Some(state),
        message,
    };
    if backup.status.as_ref() == Some(&status) {
        debug!(%state, "status unchanged, skipping update");
        return Ok(());
    }

    info!(%state, "updating backup status");
    store
        .patch_backup_status(
            &backup.name_any(),
            &backup.namespace().unwrap_or_default(),
            &status,
        )
        .await
}

/// Error policy for the backup controller
pub fn error_policy(backup: Arc<MinecraftBackup>, error: &Error, _ctx: Arc<BackupContext>) -> Action {
    error!(
        ?error,
        backup = %backup.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(REQUEUE_ERROR)
    } else {
        Action::await_change()
    }
}
