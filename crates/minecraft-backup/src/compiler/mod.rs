//! MinecraftBackup compiler
//!
//! Every child of a backup is named after the backup itself, lives in its
//! namespace and carries a controller reference to it, so deleting the backup
//! removes the Job, its pod and the RBAC that let the agent take the lease.

mod job;
mod rbac;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use minecraft_common::crd::MinecraftBackup;
use minecraft_common::labels::pod_labels;
use minecraft_common::ownership::controller_owner_ref;
use minecraft_common::Error;

pub use job::{compile_job, env, BACKUP_AGENT_IMAGE, BACKUP_DEST_PATH, BACKUP_SOURCE_DIR};
pub use rbac::{compile_role, compile_role_binding, compile_service_account};

/// Identity shared by every child of one backup
#[derive(Clone, Debug)]
pub struct BackupIdentity {
    /// Backup name; also the name of every child
    pub name: String,
    /// Namespace of the backup, its server and its children
    pub namespace: String,
    /// Controller reference every child carries
    pub owner: OwnerReference,
    /// Labels every child carries
    pub labels: BTreeMap<String, String>,
}

impl BackupIdentity {
    /// Identity of a persisted backup
    pub fn of(backup: &MinecraftBackup) -> Result<Self, Error> {
        let name = backup.name_any();
        let namespace = backup.namespace().ok_or_else(|| {
            Error::internal_with_context("compiler", format!("backup {name} has no namespace"))
        })?;
        Ok(Self {
            owner: controller_owner_ref(backup)?,
            labels: pod_labels(&name),
            name,
            namespace,
        })
    }

    /// Metadata for a child; children share the backup's name
    pub fn child_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels.clone()),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
    use minecraft_common::crd::{
        MinecraftBackupSpec, MinecraftServer, MinecraftServerSpec, ServerReference, WorldSpec,
    };

    pub(crate) fn claim(name: &str) -> PersistentVolumeClaimVolumeSource {
        PersistentVolumeClaimVolumeSource {
            claim_name: name.to_string(),
            read_only: None,
        }
    }

    pub(crate) fn backup() -> MinecraftBackup {
        let mut backup = MinecraftBackup::new(
            "nightly",
            MinecraftBackupSpec {
                server: ServerReference {
                    name: "survival".to_string(),
                },
                backup_destination: Some(claim("backups")),
            },
        );
        backup.metadata.namespace = Some("games".to_string());
        backup.metadata.uid = Some("uid-nightly".to_string());
        backup
    }

    pub(crate) fn server_with_world() -> MinecraftServer {
        let mut server = MinecraftServer::new(
            "survival",
            MinecraftServerSpec {
                minecraft_version: "1.18.2".to_string(),
                world: Some(WorldSpec {
                    seed: None,
                    overworld: Some(claim("survival-overworld")),
                    nether: Some(claim("survival-nether")),
                    the_end: Some(claim("survival-the-end")),
                }),
                ..Default::default()
            },
        );
        server.metadata.namespace = Some("games".to_string());
        server.metadata.uid = Some("uid-survival".to_string());
        server
    }

    pub(crate) fn identity() -> BackupIdentity {
        BackupIdentity::of(&backup()).expect("identity")
    }

    #[test]
    fn children_are_owned_by_the_backup() {
        let meta = identity().child_meta();
        assert_eq!(meta.name.as_deref(), Some("nightly"));
        assert_eq!(meta.namespace.as_deref(), Some("games"));
        let owners = meta.owner_references.expect("owners");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "MinecraftBackup");
        assert_eq!(owners[0].uid, "uid-nightly");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn unpersisted_backup_has_no_identity() {
        let mut b = backup();
        b.metadata.uid = None;
        assert!(BackupIdentity::of(&b).is_err());
    }
}
