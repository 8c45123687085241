//! Backup agent
//!
//! Runs once per MinecraftBackup: holds the server's backup lease, stops the
//! server from writing its world, archives the world and lets it write again.

pub mod archive;
pub mod config;
pub mod rcon;

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

pub use archive::{archive_dir, ArchiveSummary};
pub use config::AgentConfig;
pub use rcon::{Console, RconClient, RconError};

/// Archive `source` to `dest` with world saving paused
///
/// Saving is turned back on whether or not the archive succeeded; the
/// archive error wins if both fail.
pub async fn snapshot_world<C: Console + ?Sized>(
    console: &mut C,
    source: &Path,
    dest: &Path,
) -> anyhow::Result<ArchiveSummary> {
    console
        .command("save-off")
        .await
        .context("disabling world saving")?;

    let archived = async {
        console
            .command("save-all")
            .await
            .context("flushing the world to disk")?;
        let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || archive_dir(&source, &dest))
            .await
            .context("archive task panicked")?
            .context("writing archive")
    }
    .await;

    let resumed = console.command("save-on").await;
    match (archived, resumed) {
        (Ok(summary), Ok(_)) => {
            info!(files = summary.files, bytes = summary.bytes, "world archived");
            Ok(summary)
        }
        (Ok(_), Err(e)) => Err(e).context("re-enabling world saving"),
        (Err(e), resumed) => {
            if let Err(resume_err) = resumed {
                warn!(error = %resume_err, "could not re-enable world saving");
            }
            Err(e)
        }
    }
}
