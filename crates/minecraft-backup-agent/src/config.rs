//! Agent configuration, read from the environment the backup Job sets

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use minecraft_backup::compiler::{BACKUP_DEST_PATH, BACKUP_SOURCE_DIR};
use minecraft_common::DEFAULT_RCON_PASSWORD;

/// Back up one Minecraft server's world
#[derive(Parser, Debug, Clone)]
#[command(name = "minecraft-backup-agent", version, about, long_about = None)]
pub struct AgentConfig {
    /// MinecraftServer to back up
    #[arg(long, env = "SERVER_OBJECT_NAME")]
    pub server_name: String,

    /// Namespace of the MinecraftServer
    #[arg(long, env = "SERVER_OBJECT_NAMESPACE")]
    pub server_namespace: String,

    /// MinecraftBackup this run belongs to; also the lease owner
    #[arg(long, env = "BACKUP_NAME")]
    pub backup_name: String,

    /// host:port of the server's remote console
    #[arg(long, env = "RCON_ADDRESS")]
    pub rcon_address: String,

    #[arg(long, env = "RCON_PASSWORD", default_value = DEFAULT_RCON_PASSWORD, hide_env_values = true)]
    pub rcon_password: String,

    /// Directory holding the mounted world claims
    #[arg(long, env = "BACKUP_SOURCE_DIR", default_value = BACKUP_SOURCE_DIR)]
    pub source_dir: PathBuf,

    /// Directory the archive is written to
    #[arg(long, env = "BACKUP_DEST_PATH", default_value = BACKUP_DEST_PATH)]
    pub dest_path: PathBuf,

    /// Give up on the lease if it cannot be ours within this many seconds
    #[arg(long, env = "LEASE_DEADLINE_SECS", default_value_t = 1800)]
    pub lease_deadline_secs: u64,
}

impl AgentConfig {
    /// `<dest>/<backup>.tar.gz`
    pub fn archive_path(&self) -> PathBuf {
        self.dest_path.join(format!("{}.tar.gz", self.backup_name))
    }

    pub fn lease_deadline(&self) -> Duration {
        Duration::from_secs(self.lease_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AgentConfig {
        let mut argv = vec!["minecraft-backup-agent"];
        argv.extend_from_slice(args);
        AgentConfig::try_parse_from(argv).expect("parse")
    }

    #[test]
    fn defaults_match_the_job_mounts() {
        let config = parse(&[
            "--server-name",
            "survival",
            "--server-namespace",
            "games",
            "--backup-name",
            "nightly",
            "--rcon-address",
            "survival-rcon:25575",
        ]);
        assert_eq!(config.source_dir, PathBuf::from("/var/minecraft/"));
        assert_eq!(config.archive_path(), PathBuf::from("/var/backups/nightly.tar.gz"));
        assert_eq!(config.rcon_password, DEFAULT_RCON_PASSWORD);
        assert_eq!(config.lease_deadline(), Duration::from_secs(1800));
    }

    #[test]
    fn server_identity_is_required() {
        let result = AgentConfig::try_parse_from(["minecraft-backup-agent", "--backup-name", "nightly"]);
        assert!(result.is_err());
    }
}
