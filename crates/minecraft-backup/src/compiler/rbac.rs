//! Identity the backup agent runs as
//!
//! The agent only ever reads and conditionally updates the one server it
//! backs up, so the Role is pinned to that server by resource name.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};

use minecraft_common::API_GROUP;

use super::BackupIdentity;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub fn compile_service_account(id: &BackupIdentity) -> ServiceAccount {
    ServiceAccount {
        metadata: id.child_meta(),
        ..Default::default()
    }
}

/// `get`, `list` and `update` on exactly `server_name`
pub fn compile_role(id: &BackupIdentity, server_name: &str) -> Role {
    Role {
        metadata: id.child_meta(),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec!["minecraftservers".to_string()]),
            resource_names: Some(vec![server_name.to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "update".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn compile_role_binding(id: &BackupIdentity) -> RoleBinding {
    RoleBinding {
        metadata: id.child_meta(),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: id.name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: id.name.clone(),
            namespace: Some(id.namespace.clone()),
            ..Default::default()
        }]),
    }
}
