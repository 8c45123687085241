//! World archive writer

use std::fs::{self, File};
use std::io;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

/// What went into an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Regular files written
    pub files: u64,
    /// Uncompressed bytes written
    pub bytes: u64,
}

/// Write `source` as a gzip-compressed tar to `dest`
///
/// Entries are stored relative to `source` in sorted order. Symlinks are
/// stored as links and never followed. An existing `dest` is overwritten so a
/// retried Job replaces a partial archive.
pub fn archive_dir(source: &Path, dest: &Path) -> io::Result<ArchiveSummary> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut summary = ArchiveSummary::default();
    for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if path == dest {
            continue;
        }
        let Ok(rel) = path.strip_prefix(source) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        debug!(path = %rel.display(), "archiving");
        builder.append_path_with_name(path, rel)?;
        if entry.file_type().is_file() {
            summary.files += 1;
            summary.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    builder.into_inner()?.finish()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entries(archive: &Path) -> Vec<String> {
        let file = File::open(archive).expect("open archive");
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .expect("entries")
            .map(|e| {
                e.expect("entry")
                    .path()
                    .expect("path")
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn world_tree_is_archived_relative_to_source() {
        let source = tempfile::tempdir().expect("source");
        let dest = tempfile::tempdir().expect("dest");
        fs::create_dir_all(source.path().join("world/region")).expect("mkdir");
        fs::write(source.path().join("world/level.dat"), b"level").expect("write");
        fs::write(source.path().join("world/region/r.0.0.mca"), b"chunks").expect("write");

        let out = dest.path().join("nightly.tar.gz");
        let summary = archive_dir(source.path(), &out).expect("archive");

        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 11);
        assert_eq!(
            entries(&out),
            vec!["world", "world/level.dat", "world/region", "world/region/r.0.0.mca"]
        );
    }

    #[test]
    fn rerun_replaces_the_previous_archive() {
        let source = tempfile::tempdir().expect("source");
        let dest = tempfile::tempdir().expect("dest");
        let out = dest.path().join("nightly.tar.gz");

        fs::write(source.path().join("a.dat"), b"a").expect("write");
        archive_dir(source.path(), &out).expect("first");
        fs::remove_file(source.path().join("a.dat")).expect("rm");
        fs::write(source.path().join("b.dat"), b"b").expect("write");
        archive_dir(source.path(), &out).expect("second");

        assert_eq!(entries(&out), vec!["b.dat"]);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dest = tempfile::tempdir().expect("dest");
        let err = archive_dir(
            &dest.path().join("does-not-exist"),
            &dest.path().join("out.tar.gz"),
        )
        .expect_err("missing source");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
