//! Custom Resource Definitions used by the Minecraft operator

mod backup;
mod pod_monitor;
mod server;

pub use backup::{
    BackupState, MinecraftBackup, MinecraftBackupSpec, MinecraftBackupStatus, ServerReference,
};
pub use pod_monitor::{PodMetricsEndpoint, PodMonitor, PodMonitorSpec};
pub use server::{
    AccessMode, DynmapSpec, EulaAcceptance, ForgeSpec, GameMode, MinecraftServer,
    MinecraftServerSpec, MinecraftServerStatus, MonitoringSpec, MonitoringType, Player,
    PluginSpec, ServerServiceSpec, ServerState, ServerType, ServiceType, VanillaTweaksDatapack,
    VanillaTweaksSpec, WorldSpec,
};
