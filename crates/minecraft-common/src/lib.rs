//! Common types for the Minecraft operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod labels;
pub mod ownership;
pub mod retry;
pub mod telemetry;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every custom resource this operator manages
pub const API_GROUP: &str = "minecraft.jameslaverack.com";

/// API version of the custom resources
pub const API_VERSION: &str = "v1alpha1";

/// Field manager used for every write the operator performs
pub const FIELD_MANAGER: &str = "minecraft-operator";

/// Label key identifying all workloads managed by this operator
pub const LABEL_APP: &str = "app";

/// Value of [`LABEL_APP`] on managed workloads
pub const LABEL_APP_VALUE: &str = "minecraft";

/// Label key carrying the owning server's name
pub const LABEL_SERVER: &str = "minecraft";

/// Annotation on a MinecraftServer naming the backup holding its lease
pub const LEASE_OWNER_ANNOTATION: &str = "minecraft/backup-lease-owner";

/// Annotation on a MinecraftServer holding the lease expiry (RFC 3339)
pub const LEASE_EXPIRY_ANNOTATION: &str = "minecraft/backup-lease-expiry";

/// Game port exposed by every server
pub const MINECRAFT_PORT: i32 = 25565;

/// Remote console port
pub const RCON_PORT: i32 = 25575;

/// Remote console password written into every server's properties
///
/// The console is only reachable through the in-cluster rcon Service.
pub const DEFAULT_RCON_PASSWORD: &str = "password";

/// Port the Prometheus exporter plugin listens on
pub const METRICS_PORT: i32 = 9225;

/// Port the map renderer's web server listens on
pub const DYNMAP_PORT: i32 = 8123;

/// Requeue interval once every child resource has settled
pub const REQUEUE_SETTLED: Duration = Duration::from_secs(300);

/// Requeue interval after a pass applied a mutation
pub const REQUEUE_MUTATED: Duration = Duration::from_secs(5);

/// Requeue interval after a retryable error
pub const REQUEUE_ERROR: Duration = Duration::from_secs(30);
