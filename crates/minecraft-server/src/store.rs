//! Cluster access for the server controller
//!
//! [`ServerStore`] is the seam between the convergence loop and the API
//! server. Reads return `None` for absent objects; writes map optimistic
//! concurrency failures to [`Error::Conflict`] so the loop can requeue instead
//! of failing hard.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use minecraft_common::crd::{MinecraftServer, MinecraftServerStatus, PodMonitor};
use minecraft_common::{Error, FIELD_MANAGER};

/// Reads and writes the controller performs against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Get a MinecraftServer, `None` if it no longer exists
    async fn get_server(&self, name: &str, namespace: &str)
        -> Result<Option<MinecraftServer>, Error>;

    /// Merge-patch the status subresource of a MinecraftServer
    async fn patch_server_status(
        &self,
        name: &str,
        namespace: &str,
        status: &MinecraftServerStatus,
    ) -> Result<(), Error>;

    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<ConfigMap>, Error>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;
    /// Replace, guarded by the object's resourceVersion
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;
    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error>;

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;
    async fn create_service(&self, service: &Service) -> Result<(), Error>;
    async fn replace_service(&self, service: &Service) -> Result<(), Error>;
    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), Error>;

    async fn get_replica_set(&self, name: &str, namespace: &str)
        -> Result<Option<ReplicaSet>, Error>;
    async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error>;
    async fn replace_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error>;
    /// Delete with background propagation so the pods follow the workload
    async fn delete_replica_set(&self, name: &str, namespace: &str) -> Result<(), Error>;

    async fn get_pod_monitor(&self, name: &str, namespace: &str)
        -> Result<Option<PodMonitor>, Error>;
    async fn create_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error>;
    async fn replace_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error>;
    async fn delete_pod_monitor(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// [`ServerStore`] backed by a kube client
pub struct KubeServerStore {
    client: Client,
}

impl KubeServerStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for<K>(&self, obj: &K) -> Result<Api<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal_with_context(
                "store",
                format!("{} {} has no namespace", K::kind(&()), obj.name_any()),
            )
        })?;
        Ok(self.api(&namespace))
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn create<K>(api: &Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&post_params(), obj).await {
        Ok(_) => Ok(()),
        // Someone else created it since our read
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            Err(Error::conflict(K::kind(&()), obj.name_any()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn replace<K>(api: &Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = obj.name_any();
    match api.replace(&name, &post_params(), obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict(K::kind(&()), name)),
        Err(e) => Err(e.into()),
    }
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(kind = %K::kind(&()), name, "already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ServerStore for KubeServerStore {
    async fn get_server(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MinecraftServer>, Error> {
        get_opt(&self.api::<MinecraftServer>(namespace), name).await
    }

    async fn patch_server_status(
        &self,
        name: &str,
        namespace: &str,
        status: &MinecraftServerStatus,
    ) -> Result<(), Error> {
        let api: Api<MinecraftServer> = self.api(namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<ConfigMap>, Error> {
        get_opt(&self.api::<ConfigMap>(namespace), name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        create(&self.api_for(config_map)?, config_map).await
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        replace(&self.api_for(config_map)?, config_map).await
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        delete(&self.api::<ConfigMap>(namespace), name).await
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        get_opt(&self.api::<Service>(namespace), name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        create(&self.api_for(service)?, service).await
    }

    async fn replace_service(&self, service: &Service) -> Result<(), Error> {
        replace(&self.api_for(service)?, service).await
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), Error> {
        delete(&self.api::<Service>(namespace), name).await
    }

    async fn get_replica_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ReplicaSet>, Error> {
        get_opt(&self.api::<ReplicaSet>(namespace), name).await
    }

    async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error> {
        create(&self.api_for(replica_set)?, replica_set).await
    }

    async fn replace_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error> {
        replace(&self.api_for(replica_set)?, replica_set).await
    }

    async fn delete_replica_set(&self, name: &str, namespace: &str) -> Result<(), Error> {
        delete(&self.api::<ReplicaSet>(namespace), name).await
    }

    async fn get_pod_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PodMonitor>, Error> {
        get_opt(&self.api::<PodMonitor>(namespace), name).await
    }

    async fn create_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error> {
        create(&self.api_for(pod_monitor)?, pod_monitor).await
    }

    async fn replace_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error> {
        replace(&self.api_for(pod_monitor)?, pod_monitor).await
    }

    async fn delete_pod_monitor(&self, name: &str, namespace: &str) -> Result<(), Error> {
        delete(&self.api::<PodMonitor>(namespace), name).await
    }
}

/// In-memory store for multi-pass convergence tests
///
/// Objects are keyed by name within a single namespace. Writes bump a
/// resourceVersion counter and replaces with a stale version fail with a
/// conflict, like the API server.
#[cfg(test)]
pub(crate) mod memory {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub servers: Mutex<BTreeMap<String, MinecraftServer>>,
        pub config_maps: Mutex<BTreeMap<String, ConfigMap>>,
        pub services: Mutex<BTreeMap<String, Service>>,
        pub replica_sets: Mutex<BTreeMap<String, ReplicaSet>>,
        pub pod_monitors: Mutex<BTreeMap<String, PodMonitor>>,
        writes: Mutex<Vec<String>>,
        version: Mutex<u64>,
    }

    impl MemoryStore {
        pub(crate) fn with_server(server: MinecraftServer) -> Self {
            let store = Self::default();
            store.servers.lock().insert(server.name_any(), server);
            store
        }

        /// Every write so far, as `"<verb> <Kind>/<name>"`
        pub(crate) fn writes(&self) -> Vec<String> {
            self.writes.lock().clone()
        }

        pub(crate) fn clear_writes(&self) {
            self.writes.lock().clear();
        }

        pub(crate) fn status(&self, name: &str) -> Option<MinecraftServerStatus> {
            self.servers.lock().get(name).and_then(|s| s.status.clone())
        }

        fn record(&self, verb: &str, kind: &str, name: &str) {
            self.writes.lock().push(format!("{verb} {kind}/{name}"));
        }

        fn next_version(&self) -> String {
            let mut version = self.version.lock();
            *version += 1;
            version.to_string()
        }

        fn put<K>(&self, map: &Mutex<BTreeMap<String, K>>, obj: &K, is_create: bool) -> Result<(), Error>
        where
            K: Resource<DynamicType = ()> + Clone,
        {
            let kind = K::kind(&()).to_string();
            let name = obj.name_any();
            let mut map = map.lock();
            match (map.get(&name), is_create) {
                (Some(_), true) => return Err(Error::conflict(kind, name)),
                (None, false) => {
                    return Err(Error::internal_with_context(
                        "memory-store",
                        format!("{kind} {name} not found"),
                    ))
                }
                (Some(live), false)
                    if live.meta().resource_version != obj.meta().resource_version =>
                {
                    return Err(Error::conflict(kind, name))
                }
                _ => {}
            }
            let mut stored = obj.clone();
            stored.meta_mut().resource_version = Some(self.next_version());
            map.insert(name.clone(), stored);
            drop(map);
            self.record(if is_create { "create" } else { "replace" }, &kind, &name);
            Ok(())
        }

        fn remove<K>(&self, map: &Mutex<BTreeMap<String, K>>, name: &str) -> Result<(), Error>
        where
            K: Resource<DynamicType = ()>,
        {
            if map.lock().remove(name).is_some() {
                self.record("delete", &K::kind(&()), name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ServerStore for MemoryStore {
        async fn get_server(&self, name: &str, _: &str) -> Result<Option<MinecraftServer>, Error> {
            Ok(self.servers.lock().get(name).cloned())
        }

        async fn patch_server_status(
            &self,
            name: &str,
            _: &str,
            status: &MinecraftServerStatus,
        ) -> Result<(), Error> {
            if let Some(server) = self.servers.lock().get_mut(name) {
                server.status = Some(status.clone());
            }
            self.record("patch-status", "MinecraftServer", name);
            Ok(())
        }

        async fn get_config_map(&self, name: &str, _: &str) -> Result<Option<ConfigMap>, Error> {
            Ok(self.config_maps.lock().get(name).cloned())
        }

        async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
            self.put(&self.config_maps, config_map, true)
        }

        async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
            self.put(&self.config_maps, config_map, false)
        }

        async fn delete_config_map(&self, name: &str, _: &str) -> Result<(), Error> {
            self.remove(&self.config_maps, name)
        }

        async fn get_service(&self, name: &str, _: &str) -> Result<Option<Service>, Error> {
            Ok(self.services.lock().get(name).cloned())
        }

        async fn create_service(&self, service: &Service) -> Result<(), Error> {
            self.put(&self.services, service, true)
        }

        async fn replace_service(&self, service: &Service) -> Result<(), Error> {
            self.put(&self.services, service, false)
        }

        async fn delete_service(&self, name: &str, _: &str) -> Result<(), Error> {
            self.remove(&self.services, name)
        }

        async fn get_replica_set(&self, name: &str, _: &str) -> Result<Option<ReplicaSet>, Error> {
            Ok(self.replica_sets.lock().get(name).cloned())
        }

        async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error> {
            self.put(&self.replica_sets, replica_set, true)
        }

        async fn replace_replica_set(&self, replica_set: &ReplicaSet) -> Result<(), Error> {
            self.put(&self.replica_sets, replica_set, false)
        }

        async fn delete_replica_set(&self, name: &str, _: &str) -> Result<(), Error> {
            self.remove(&self.replica_sets, name)
        }

        async fn get_pod_monitor(&self, name: &str, _: &str) -> Result<Option<PodMonitor>, Error> {
            Ok(self.pod_monitors.lock().get(name).cloned())
        }

        async fn create_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error> {
            self.put(&self.pod_monitors, pod_monitor, true)
        }

        async fn replace_pod_monitor(&self, pod_monitor: &PodMonitor) -> Result<(), Error> {
            self.put(&self.pod_monitors, pod_monitor, false)
        }

        async fn delete_pod_monitor(&self, name: &str, _: &str) -> Result<(), Error> {
            self.remove(&self.pod_monitors, name)
        }
    }
}
