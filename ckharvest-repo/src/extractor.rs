//! Zip archive extraction confined to the workspace

use ckharvest_core::{extraction_error, HarvestError, HarvestResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Unpacks a downloaded snapshot into a fresh directory
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract `archive_path` into `destination`, which must not exist yet.
    ///
    /// Every entry is resolved relative to `destination`; an entry with an
    /// absolute path or `..` segments fails the whole extraction before
    /// anything is written for it.
    pub fn extract(&self, archive_path: &Path, destination: &Path) -> HarvestResult<PathBuf> {
        let file = fs::File::open(archive_path).map_err(|e| {
            extraction_error!(
                format!("Failed to open archive {}: {}", archive_path.display(), e),
                "archive_extractor",
                e
            )
        })?;

        let mut archive = ZipArchive::new(file).map_err(|e| {
            extraction_error!(
                format!("Malformed archive {}: {}", archive_path.display(), e),
                "archive_extractor",
                e
            )
        })?;

        if archive.is_empty() {
            return Err(extraction_error!(
                format!("Archive {} contains no entries", archive_path.display()),
                "archive_extractor"
            ));
        }

        if destination.exists() {
            return Err(extraction_error!(
                format!(
                    "Extraction target {} already exists",
                    destination.display()
                ),
                "archive_extractor"
            ));
        }

        fs::create_dir_all(destination).map_err(|e| {
            extraction_error!(
                format!("Failed to create {}: {}", destination.display(), e),
                "archive_extractor",
                e
            )
        })?;

        let mut files = 0usize;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| {
                extraction_error!(
                    format!("Corrupt entry #{} in archive: {}", index, e),
                    "archive_extractor",
                    e
                )
            })?;

            let relative = entry.enclosed_name().ok_or_else(|| {
                extraction_error!(
                    format!(
                        "Archive entry '{}' escapes the extraction directory",
                        entry.name()
                    ),
                    "archive_extractor"
                )
            })?;
            let target = destination.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| unpack_failed(&target, e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| unpack_failed(parent, e))?;
            }

            let mut output = fs::File::create(&target).map_err(|e| unpack_failed(&target, e))?;
            io::copy(&mut entry, &mut output).map_err(|e| {
                extraction_error!(
                    format!("Truncated or corrupt entry '{}': {}", entry.name(), e),
                    "archive_extractor",
                    e
                )
            })?;
            files += 1;
        }

        debug!(destination = %destination.display(), files, "Archive unpacked");
        info!(archive = %archive_path.display(), files, "Extraction complete");

        Ok(destination.to_path_buf())
    }
}

/// An entry whose path cannot be materialized, e.g. a file nested under another file
fn unpack_failed(path: &Path, e: io::Error) -> HarvestError {
    extraction_error!(
        format!("Cannot unpack '{}': {}", path.display(), e),
        "archive_extractor",
        e
    )
}
