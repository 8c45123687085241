//! MinecraftServer convergence
//!
//! - [`compiler`]: pure spec-to-children compilation
//! - [`artifacts`]: version index lookups resolved once per pass
//! - [`diff`]: equivalence rules and the single corrective mutation
//! - [`store`]: the narrow object-store seam the controller writes through
//! - [`controller`]: the reconcile loop tying them together

pub mod artifacts;
pub mod compiler;
pub mod controller;
pub mod diff;
pub mod store;

pub use controller::{error_policy, reconcile, ServerContext, TemplateDriftPolicy};
pub use minecraft_common::{Error, Result};
