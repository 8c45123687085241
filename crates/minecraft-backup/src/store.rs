//! Cluster access for the backup controller

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use minecraft_common::crd::{MinecraftBackup, MinecraftBackupStatus, MinecraftServer};
use minecraft_common::{Error, FIELD_MANAGER};

/// Reads and writes the backup controller performs against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Get a MinecraftBackup, `None` if it no longer exists
    async fn get_backup(&self, name: &str, namespace: &str)
        -> Result<Option<MinecraftBackup>, Error>;

    /// Merge-patch the status subresource of a MinecraftBackup
    async fn patch_backup_status(
        &self,
        name: &str,
        namespace: &str,
        status: &MinecraftBackupStatus,
    ) -> Result<(), Error>;

    /// Get the server a backup targets
    async fn get_server(&self, name: &str, namespace: &str)
        -> Result<Option<MinecraftServer>, Error>;

    async fn get_service_account(&self, name: &str, namespace: &str)
        -> Result<Option<ServiceAccount>, Error>;
    async fn create_service_account(&self, sa: &ServiceAccount) -> Result<(), Error>;
    async fn replace_service_account(&self, sa: &ServiceAccount) -> Result<(), Error>;

    async fn get_role(&self, name: &str, namespace: &str) -> Result<Option<Role>, Error>;
    async fn create_role(&self, role: &Role) -> Result<(), Error>;
    async fn replace_role(&self, role: &Role) -> Result<(), Error>;

    async fn get_role_binding(&self, name: &str, namespace: &str)
        -> Result<Option<RoleBinding>, Error>;
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error>;
    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<(), Error>;

    async fn get_job(&self, name: &str, namespace: &str) -> Result<Option<Job>, Error>;
    async fn create_job(&self, job: &Job) -> Result<(), Error>;
    async fn replace_job(&self, job: &Job) -> Result<(), Error>;
}

/// [`BackupStore`] backed by a kube client
pub struct KubeBackupStore {
    client: Client,
}

impl KubeBackupStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<K>(&self, obj: &K, is_create: bool) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let name = obj.name_any();
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal_with_context("store", format!("{} {name} has no namespace", K::kind(&())))
        })?;
        let api = self.api::<K>(&namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let result = if is_create {
            api.create(&params, obj).await
        } else {
            api.replace(&name, &params, obj).await
        };
        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict(K::kind(&()), name)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BackupStore for KubeBackupStore {
    async fn get_backup(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MinecraftBackup>, Error> {
        self.get(name, namespace).await
    }

    async fn patch_backup_status(
        &self,
        name: &str,
        namespace: &str,
        status: &MinecraftBackupStatus,
    ) -> Result<(), Error> {
        let api: Api<MinecraftBackup> = self.api(namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_server(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MinecraftServer>, Error> {
        self.get(name, namespace).await
    }

    async fn get_service_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        self.get(name, namespace).await
    }

    async fn create_service_account(&self, sa: &ServiceAccount) -> Result<(), Error> {
        self.write(sa, true).await
    }

    async fn replace_service_account(&self, sa: &ServiceAccount) -> Result<(), Error> {
        self.write(sa, false).await
    }

    async fn get_role(&self, name: &str, namespace: &str) -> Result<Option<Role>, Error> {
        self.get(name, namespace).await
    }

    async fn create_role(&self, role: &Role) -> Result<(), Error> {
        self.write(role, true).await
    }

    async fn replace_role(&self, role: &Role) -> Result<(), Error> {
        self.write(role, false).await
    }

    async fn get_role_binding(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RoleBinding>, Error> {
        self.get(name, namespace).await
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        self.write(binding, true).await
    }

    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        self.write(binding, false).await
    }

    async fn get_job(&self, name: &str, namespace: &str) -> Result<Option<Job>, Error> {
        self.get(name, namespace).await
    }

    async fn create_job(&self, job: &Job) -> Result<(), Error> {
        self.write(job, true).await
    }

    async fn replace_job(&self, job: &Job) -> Result<(), Error> {
        self.write(job, false).await
    }
}
