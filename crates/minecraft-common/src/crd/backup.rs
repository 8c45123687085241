//! MinecraftBackup Custom Resource Definition
//!
//! One MinecraftBackup is one backup attempt of one server. The operator runs
//! it as a Job whose agent takes the server's backup lease, quiesces saves
//! and archives the world into the destination claim.

use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to the server being backed up (same namespace)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ServerReference {
    /// Name of the MinecraftServer
    pub name: String,
}

/// Outcome of a backup attempt
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupState {
    /// The backup job has not finished yet
    Pending,
    /// The backup job succeeded
    Complete,
    /// The backup job failed, or the server does not exist
    Failed,
}

impl BackupState {
    /// Terminal states are never left
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a MinecraftBackup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftBackupStatus {
    /// Outcome; unset until the controller first observes the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BackupState>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a MinecraftBackup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "minecraft.jameslaverack.com",
    version = "v1alpha1",
    kind = "MinecraftBackup",
    plural = "minecraftbackups",
    shortname = "mcb",
    namespaced,
    status = "MinecraftBackupStatus",
    printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.server.name"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftBackupSpec {
    /// Server to back up
    pub server: ServerReference,

    /// Claim the archive is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_destination: Option<PersistentVolumeClaimVolumeSource>,
}

impl MinecraftBackup {
    /// Current state, if the controller has recorded one
    pub fn state(&self) -> Option<BackupState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses() {
        let spec: MinecraftBackupSpec = serde_yaml::from_str(
            r#"
server:
  name: survival
backupDestination:
  claimName: backups
"#,
        )
        .expect("parse spec");
        assert_eq!(spec.server.name, "survival");
        assert_eq!(
            spec.backup_destination.map(|c| c.claim_name),
            Some("backups".to_string())
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!BackupState::Pending.is_terminal());
        assert!(BackupState::Complete.is_terminal());
        assert!(BackupState::Failed.is_terminal());
    }

    #[test]
    fn fresh_backup_has_no_state() {
        let backup = MinecraftBackup::new("nightly", MinecraftBackupSpec::default());
        assert_eq!(backup.state(), None);
    }
}
