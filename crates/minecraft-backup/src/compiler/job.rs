//! The one-shot Job running the backup agent

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use kube::ResourceExt;

use minecraft_common::crd::{MinecraftBackup, MinecraftServer};
use minecraft_common::{Error, RCON_PORT};
use minecraft_server::compiler::{rcon_service_name, restricted_security_context};

use super::BackupIdentity;

/// Agent image used when the operator is not told otherwise
pub const BACKUP_AGENT_IMAGE: &str =
    "ghcr.io/jameslaverack/kubernetes-minecraft-operator-backup-agent:latest";

/// Where the world claims are mounted in the agent container
pub const BACKUP_SOURCE_DIR: &str = "/var/minecraft/";

/// Where the destination claim is mounted in the agent container
pub const BACKUP_DEST_PATH: &str = "/var/backups/";

const AGENT_CONTAINER: &str = "backup-agent";

/// Environment variables the agent reads
pub mod env {
    pub const SERVER_OBJECT_NAME: &str = "SERVER_OBJECT_NAME";
    pub const SERVER_OBJECT_NAMESPACE: &str = "SERVER_OBJECT_NAMESPACE";
    pub const BACKUP_NAME: &str = "BACKUP_NAME";
    pub const RCON_ADDRESS: &str = "RCON_ADDRESS";
    pub const BACKUP_SOURCE_DIR: &str = "BACKUP_SOURCE_DIR";
    pub const BACKUP_DEST_PATH: &str = "BACKUP_DEST_PATH";
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn claim_volume(name: &str, claim: PersistentVolumeClaimVolumeSource) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(claim),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// World claims are only ever read by the agent
fn world_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        read_only: Some(true),
        ..mount(name, path)
    }
}

/// Compile the agent Job of `backup` against `server`
///
/// The server must declare all three world claims and the backup its
/// destination claim; anything less is a compilation error.
pub fn compile_job(
    id: &BackupIdentity,
    backup: &MinecraftBackup,
    server: &MinecraftServer,
    image: &str,
) -> Result<Job, Error> {
    let world = server.spec.world.as_ref();
    let dimension = |claim: Option<&PersistentVolumeClaimVolumeSource>, field: &str| {
        claim.cloned().ok_or_else(|| {
            Error::compilation_for_field(
                &id.name,
                format!("spec.world.{field}"),
                format!("server {} has no {field} claim to back up", server.name_any()),
            )
        })
    };
    let overworld = dimension(world.and_then(|w| w.overworld.as_ref()), "overworld")?;
    let nether = dimension(world.and_then(|w| w.nether.as_ref()), "nether")?;
    let the_end = dimension(world.and_then(|w| w.the_end.as_ref()), "theEnd")?;
    let destination = backup.spec.backup_destination.clone().ok_or_else(|| {
        Error::compilation_for_field(
            &id.name,
            "spec.backupDestination",
            "backup has no destination claim",
        )
    })?;

    let server_name = server.name_any();
    let container = Container {
        name: AGENT_CONTAINER.to_string(),
        image: Some(image.to_string()),
        security_context: Some(restricted_security_context()),
        env: Some(vec![
            env_var(env::SERVER_OBJECT_NAME, &server_name),
            env_var(
                env::SERVER_OBJECT_NAMESPACE,
                server.namespace().unwrap_or_else(|| id.namespace.clone()),
            ),
            env_var(env::BACKUP_NAME, &id.name),
            env_var(
                env::RCON_ADDRESS,
                format!("{}:{RCON_PORT}", rcon_service_name(&server_name)),
            ),
            env_var(env::BACKUP_SOURCE_DIR, BACKUP_SOURCE_DIR),
            env_var(env::BACKUP_DEST_PATH, BACKUP_DEST_PATH),
        ]),
        volume_mounts: Some(vec![
            world_mount("world-overworld", "/var/minecraft/world"),
            world_mount("world-nether", "/var/minecraft/world_nether"),
            world_mount("world-the-end", "/var/minecraft/world_the_end"),
            mount("world-backup", BACKUP_DEST_PATH),
        ]),
        ..Default::default()
    };

    Ok(Job {
        metadata: id.child_meta(),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(id.name.clone()),
                    containers: vec![container],
                    volumes: Some(vec![
                        claim_volume("world-overworld", overworld),
                        claim_volume("world-nether", nether),
                        claim_volume("world-the-end", the_end),
                        claim_volume("world-backup", destination),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::{backup, identity, server_with_world};

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .expect("pod spec")
    }

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
        container
            .env
            .iter()
            .flatten()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn job_runs_the_agent_once_with_its_identity() {
        let job = compile_job(&identity(), &backup(), &server_with_world(), BACKUP_AGENT_IMAGE)
            .expect("job");
        let pod = pod_spec(&job);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("nightly"));

        let agent = &pod.containers[0];
        assert_eq!(agent.name, "backup-agent");
        assert_eq!(env_value(agent, env::SERVER_OBJECT_NAME), Some("survival"));
        assert_eq!(env_value(agent, env::SERVER_OBJECT_NAMESPACE), Some("games"));
        assert_eq!(env_value(agent, env::BACKUP_NAME), Some("nightly"));
        assert_eq!(env_value(agent, env::RCON_ADDRESS), Some("survival-rcon:25575"));
        assert_eq!(env_value(agent, env::BACKUP_SOURCE_DIR), Some("/var/minecraft/"));
        assert_eq!(env_value(agent, env::BACKUP_DEST_PATH), Some("/var/backups/"));
    }

    #[test]
    fn world_and_destination_claims_are_mounted() {
        let job = compile_job(&identity(), &backup(), &server_with_world(), BACKUP_AGENT_IMAGE)
            .expect("job");
        let pod = pod_spec(&job);
        let claims: Vec<&str> = pod
            .volumes
            .iter()
            .flatten()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.as_str())
            .collect();
        assert_eq!(
            claims,
            vec!["survival-overworld", "survival-nether", "survival-the-end", "backups"]
        );
        let mounts: Vec<(&str, Option<bool>)> = pod.containers[0]
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.mount_path.as_str(), m.read_only))
            .collect();
        assert_eq!(
            mounts,
            vec![
                ("/var/minecraft/world", Some(true)),
                ("/var/minecraft/world_nether", Some(true)),
                ("/var/minecraft/world_the_end", Some(true)),
                ("/var/backups/", None),
            ]
        );
    }

    /// Story: backing up a server without persistent worlds cannot work, and
    /// says which claim is missing
    #[test]
    fn story_server_without_world_claims_cannot_be_backed_up() {
        let mut server = server_with_world();
        if let Some(world) = server.spec.world.as_mut() {
            world.nether = None;
        }
        let err = compile_job(&identity(), &backup(), &server, BACKUP_AGENT_IMAGE)
            .expect_err("missing nether");
        assert!(err.is_compilation());
        assert!(!err.is_retryable());
        match err {
            Error::Compilation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.world.nether"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn backup_without_destination_cannot_be_compiled() {
        let mut b = backup();
        b.spec.backup_destination = None;
        let err = compile_job(&identity(), &b, &server_with_world(), BACKUP_AGENT_IMAGE)
            .expect_err("missing destination");
        assert!(err.is_compilation());
    }
}
