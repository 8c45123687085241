//! Backup lease on a MinecraftServer
//!
//! The lease is two annotations on the server: the owning backup's name and an
//! RFC 3339 expiry. It is taken with a write conditioned on the resourceVersion
//! that was read, so of two racing agents exactly one write lands; the loser
//! rereads, finds the winner's lease and sleeps until it expires.
//!
//! # Exclusivity
//!
//! Acquisition is exclusive; use is not. Nothing renews the lease, so a
//! holder that outlives the expiry loses exclusivity without noticing.
//! [`LeaseAcquirer::revalidate`] lets the agent check it still holds the lease
//! immediately before quiescing the server, which narrows the window but does
//! not close it. Release is implicit, by expiry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use minecraft_common::crd::MinecraftServer;
use minecraft_common::{Error, FIELD_MANAGER, LEASE_EXPIRY_ANNOTATION, LEASE_OWNER_ANNOTATION};

/// How long a freshly written lease is valid
pub const LEASE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Conflicting writes tolerated before acquisition gives up
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Lease protocol failures
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The server to lease does not exist
    #[error("server {namespace}/{name} not found")]
    ServerNotFound {
        /// Server name
        name: String,
        /// Server namespace
        namespace: String,
    },

    /// Another holder's lease outlasts our deadline
    #[error("lease on {server} held by {holder} until {expires_at}, past the deadline {deadline}")]
    DeadlineExceeded {
        /// Server name
        server: String,
        /// Current holder
        holder: String,
        /// When the current lease expires
        expires_at: DateTime<Utc>,
        /// Our deadline
        deadline: DateTime<Utc>,
    },

    /// Too many writes lost to concurrent writers
    #[error("lease on {server} not acquired after {attempts} conflicting writes")]
    Contended {
        /// Server name
        server: String,
        /// Number of conflicting writes
        attempts: u32,
    },

    /// The lease is no longer ours
    #[error("lease on {server} lost (now held by {})", .holder.as_deref().unwrap_or("nobody"))]
    Lost {
        /// Server name
        server: String,
        /// Current holder, if any
        holder: Option<String>,
    },

    /// Store failure
    #[error(transparent)]
    Store(#[from] Error),
}

/// A lease as written on the server, expired or not
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseHolder {
    /// Name of the backup holding the lease
    pub owner: String,
    /// When the lease lapses
    pub expires_at: DateTime<Utc>,
}

impl LeaseHolder {
    /// Whether the lease still excludes others at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// The lease annotations of a server at one resourceVersion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseRecord {
    /// resourceVersion the record was read at; writes are conditioned on it
    pub version: String,
    /// Holder, if both annotations are present and parse
    pub holder: Option<LeaseHolder>,
}

impl LeaseRecord {
    /// Parse the lease annotations out of a server's metadata
    ///
    /// A missing owner or an unparseable expiry reads as unleased.
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let annotations = meta.annotations.as_ref();
        let owner = annotations.and_then(|a| a.get(LEASE_OWNER_ANNOTATION));
        let expiry = annotations.and_then(|a| a.get(LEASE_EXPIRY_ANNOTATION));

        let holder = match (owner, expiry) {
            (Some(owner), Some(expiry)) => match DateTime::parse_from_rfc3339(expiry) {
                Ok(expires_at) => Some(LeaseHolder {
                    owner: owner.clone(),
                    expires_at: expires_at.with_timezone(&Utc),
                }),
                Err(e) => {
                    warn!(owner = %owner, expiry = %expiry, error = %e, "ignoring unparseable lease expiry");
                    None
                }
            },
            _ => None,
        };

        Self {
            version: meta.resource_version.clone().unwrap_or_default(),
            holder,
        }
    }

    /// The holder, if the lease is still in force at `now`
    pub fn active_holder(&self, now: DateTime<Utc>) -> Option<&LeaseHolder> {
        self.holder.as_ref().filter(|h| h.is_active(now))
    }
}

/// Write the lease annotations into `meta`, keeping every other annotation
pub fn write_holder(meta: &mut ObjectMeta, holder: &LeaseHolder) {
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(LEASE_OWNER_ANNOTATION.to_string(), holder.owner.clone());
    annotations.insert(
        LEASE_EXPIRY_ANNOTATION.to_string(),
        holder.expires_at.to_rfc3339(),
    );
}

/// Read and conditionally write a server's lease record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the lease record, `None` if the server does not exist
    async fn read(&self, server: &str, namespace: &str) -> Result<Option<LeaseRecord>, Error>;

    /// Write `holder` if the server is still at `version`
    ///
    /// Fails with [`Error::Conflict`] if anything changed the server since.
    async fn write(
        &self,
        server: &str,
        namespace: &str,
        version: &str,
        holder: &LeaseHolder,
    ) -> Result<(), Error>;
}

/// [`LeaseStore`] on the MinecraftServer object itself
///
/// Needs only `get` and `update` on the server, which is all the backup Role
/// grants.
pub struct KubeLeaseStore {
    client: Client,
}

impl KubeLeaseStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<MinecraftServer> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_server(api: &Api<MinecraftServer>, name: &str) -> Result<Option<MinecraftServer>, Error> {
    match api.get(name).await {
        Ok(server) => Ok(Some(server)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn read(&self, server: &str, namespace: &str) -> Result<Option<LeaseRecord>, Error> {
        let found = get_server(&self.api(namespace), server).await?;
        Ok(found.map(|s| LeaseRecord::from_meta(&s.metadata)))
    }

    async fn write(
        &self,
        server: &str,
        namespace: &str,
        version: &str,
        holder: &LeaseHolder,
    ) -> Result<(), Error> {
        let api = self.api(namespace);
        let Some(mut current) = get_server(&api, server).await? else {
            return Err(Error::conflict("MinecraftServer", server));
        };
        if current.resource_version().as_deref() != Some(version) {
            return Err(Error::conflict("MinecraftServer", server));
        }

        write_holder(&mut current.metadata, holder);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        // replace carries the resourceVersion read above; the API server rejects it if stale
        match api.replace(server, &params, &current).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict("MinecraftServer", server))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Time source for the lease protocol
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock and tokio timers
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Takes and checks one backup's lease on one server
pub struct LeaseAcquirer {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    server: String,
    namespace: String,
    owner: String,
    duration: Duration,
    max_conflicts: u32,
}

impl LeaseAcquirer {
    /// Acquirer for `owner` with the default lease duration and retry bound
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        server: impl Into<String>,
        namespace: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            server: server.into(),
            namespace: namespace.into(),
            owner: owner.into(),
            duration: LEASE_DURATION,
            max_conflicts: MAX_CONFLICT_RETRIES,
        }
    }

    /// Override the lease duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    async fn read(&self) -> Result<LeaseRecord, LeaseError> {
        self.store
            .read(&self.server, &self.namespace)
            .await?
            .ok_or_else(|| LeaseError::ServerNotFound {
                name: self.server.clone(),
                namespace: self.namespace.clone(),
            })
    }

    /// Block until the lease is ours or `deadline` makes waiting pointless
    ///
    /// A lease already held by this owner is returned as is, so a restarted
    /// agent picks up where it left off.
    pub async fn acquire(&self, deadline: DateTime<Utc>) -> Result<LeaseHolder, LeaseError> {
        let mut conflicts = 0;
        loop {
            let record = self.read().await?;
            let now = self.clock.now();

            if let Some(holder) = record.active_holder(now) {
                if holder.owner == self.owner {
                    debug!(server = %self.server, "lease already held by us");
                    return Ok(holder.clone());
                }
                if holder.expires_at > deadline {
                    return Err(LeaseError::DeadlineExceeded {
                        server: self.server.clone(),
                        holder: holder.owner.clone(),
                        expires_at: holder.expires_at,
                        deadline,
                    });
                }
                let wait = (holder.expires_at - now).to_std().unwrap_or_default();
                info!(
                    server = %self.server,
                    holder = %holder.owner,
                    wait_secs = wait.as_secs(),
                    "lease held by another backup, waiting for expiry"
                );
                self.clock.sleep(wait).await;
                continue;
            }

            let expires_at = now
                + chrono::Duration::from_std(self.duration).map_err(|e| {
                    Error::internal_with_context("lease", format!("lease duration: {e}"))
                })?;
            let holder = LeaseHolder {
                owner: self.owner.clone(),
                expires_at,
            };

            match self
                .store
                .write(&self.server, &self.namespace, &record.version, &holder)
                .await
            {
                Ok(()) => {
                    info!(server = %self.server, expires_at = %holder.expires_at, "lease acquired");
                    return Ok(holder);
                }
                Err(Error::Conflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.max_conflicts {
                        return Err(LeaseError::Contended {
                            server: self.server.clone(),
                            attempts: conflicts,
                        });
                    }
                    debug!(server = %self.server, conflicts, "lease write lost a race, rereading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Confirm the lease is still ours and in force
    pub async fn revalidate(&self) -> Result<LeaseHolder, LeaseError> {
        let record = self.read().await?;
        match record.active_holder(self.clock.now()) {
            Some(holder) if holder.owner == self.owner => Ok(holder.clone()),
            other => Err(LeaseError::Lost {
                server: self.server.clone(),
                holder: other.map(|h| h.owner.clone()),
            }),
        }
    }
}
