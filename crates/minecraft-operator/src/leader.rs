//! Leader election on a coordination.k8s.io/v1 Lease
//!
//! Only the replica holding the Lease runs controllers. Every write carries
//! the resourceVersion it was decided on, so two replicas racing for an
//! expired Lease cannot both win: the loser gets a 409 and tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use minecraft_common::FIELD_MANAGER;

/// Lease the operator replicas compete for
pub const LEADER_LEASE_NAME: &str = "minecraft-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// What a replica may do with the Lease as it stands
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    /// No Lease yet
    Create,
    /// We hold it
    Renew,
    /// Held by someone else but expired, or never held
    TakeOver { transitions: i32 },
    /// Held by someone else and in force
    Wait { holder: String },
}

fn claim(existing: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> Claim {
    let Some(lease) = existing else {
        return Claim::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return Claim::Renew;
    }

    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renewed, duration) {
        (Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    };

    match holder {
        Some(holder) if !expired => Claim::Wait {
            holder: holder.to_string(),
        },
        _ => Claim::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        },
    }
}

/// Competes for the operator Lease
pub struct LeaderElector {
    client: Client,
    namespace: String,
    identity: String,
    lease_duration: Duration,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Block until this replica leads, then keep renewing in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = LEADER_LEASE_NAME, "waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "leadership acquired");
                    return self.guard();
                }
                Ok(false) => {}
                Err(e) => warn!(identity = %self.identity, error = %e, "lease check failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal = tokio::spawn(async move { elector.renew_until_lost(lost_tx).await });
        LeaderGuard {
            elector: Arc::clone(self),
            renewal,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let existing = match api.get(LEADER_LEASE_NAME).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(ae)) if ae.code == 404 => None,
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();

        let (lease, create) = match claim(existing.as_ref(), &self.identity, now) {
            Claim::Wait { holder } => {
                debug!(%holder, "lease held elsewhere");
                return Ok(false);
            }
            Claim::Create => (self.lease(ObjectMeta::default(), now, 0), true),
            Claim::Renew => {
                let Some(mut lease) = existing else {
                    return Ok(false);
                };
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                (lease, false)
            }
            Claim::TakeOver { transitions } => {
                let meta = existing.map(|l| l.metadata).unwrap_or_default();
                (self.lease(meta, now, transitions), false)
            }
        };

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let result = if create {
            api.create(&params, &lease).await
        } else {
            api.replace(LEADER_LEASE_NAME, &params, &lease).await
        };
        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(identity = %self.identity, "lost a race for the lease");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A Lease held by us, keeping `meta`'s resourceVersion
    fn lease(&self, meta: ObjectMeta, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                resource_version: meta.resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn renew_until_lost(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Expire our hold so a standby takes over without waiting
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();
        let lease = match api.get(LEADER_LEASE_NAME).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(past),
            }
        });
        api.patch(
            LEADER_LEASE_NAME,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        info!(identity = %self.identity, "leadership released");
        Ok(())
    }
}

/// Held while this replica leads
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolves when renewal fails
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Give up leadership on a clean shutdown
    pub async fn release(self) -> Result<(), LeaderElectionError> {
        self.renewal.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}
