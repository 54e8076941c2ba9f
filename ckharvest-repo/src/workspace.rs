//! Per-repository scratch space and its cleanup

use ckharvest_core::{ErrorContext, HarvestError, HarvestResult, RepositoryDescriptor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARCHIVE_FILE: &str = "archive.zip";
const SOURCE_DIR: &str = "source";
const OUTPUT_DIR: &str = "ck_output";

/// A uniquely named directory owned by one processing attempt.
///
/// Everything downloaded or produced for the repository lives below
/// [`Workspace::root`]. The directory is removed by [`Workspace::cleanup`], and
/// dropping a workspace that was never cleaned up removes it as well.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    cleaned: bool,
}

/// Paths that could not be removed during cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub failed_paths: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed_paths.is_empty()
    }
}

impl Workspace {
    /// Create `<work_root>/<owner>_<name>_<uuid>`
    pub fn create(work_root: &Path, descriptor: &RepositoryDescriptor) -> HarvestResult<Self> {
        let dir_name = format!(
            "{}_{}_{}",
            sanitize(&descriptor.owner),
            sanitize(&descriptor.name),
            uuid::Uuid::new_v4().simple()
        );
        let root = work_root.join(dir_name);

        std::fs::create_dir_all(&root).map_err(|e| HarvestError::Persistence {
            message: format!("Failed to create workspace {}: {}", root.display(), e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("workspace")
                .with_operation("create")
                .with_suggestion("Check that the work directory is writable"),
        })?;

        debug!(workspace = %root.display(), "Created workspace");

        Ok(Self {
            root,
            cleaned: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(ARCHIVE_FILE)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    /// Remove the archive, extracted tree, raw tables and the workspace itself.
    ///
    /// Best effort: every failure is logged and reported, none is raised.
    pub fn cleanup(&mut self) -> CleanupReport {
        self.cleaned = true;
        let mut report = CleanupReport::default();

        let archive = self.archive_path();
        if archive.exists() {
            if let Err(e) = std::fs::remove_file(&archive) {
                warn!(path = %archive.display(), error = %e, "Failed to remove archive");
                report.failed_paths.push(archive);
            }
        }

        for dir in [self.output_dir(), self.source_dir(), self.root.clone()] {
            if !dir.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "Failed to remove workspace directory");
                report.failed_paths.push(dir);
            }
        }

        if report.is_clean() {
            debug!(workspace = %self.root.display(), "Workspace removed");
        }

        report
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned {
            let _ = self.cleanup();
        }
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
