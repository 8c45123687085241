//! MinecraftBackup support
//!
//! The controller turns a backup into an agent Job with just enough RBAC to
//! take the backup lease on its server. The lease protocol itself lives here
//! too so the agent and its tests share one implementation.

pub mod compiler;
pub mod controller;
pub mod lease;
pub mod store;

pub use controller::{error_policy, reconcile, BackupContext};
pub use lease::{KubeLeaseStore, LeaseAcquirer, LeaseError, LeaseHolder, SystemClock};
pub use minecraft_common::{Error, Result};
