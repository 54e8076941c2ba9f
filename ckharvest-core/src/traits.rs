//! Core trait definitions for the pipeline stages that talk to the outside world

use crate::error::HarvestResult;
use crate::types::*;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Downloads a repository source snapshot
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Download the archive for `descriptor` to `destination`.
    ///
    /// On failure no file exists at `destination`.
    async fn fetch(
        &self,
        descriptor: &RepositoryDescriptor,
        destination: &Path,
    ) -> HarvestResult<PathBuf>;
}

/// Runs the external static-analysis tool
#[async_trait]
pub trait MetricsAnalyzer: Send + Sync {
    /// Check that the analyzer can be executed at all
    async fn verify(&self) -> HarvestResult<()> {
        Ok(())
    }

    /// Analyze `source_tree`, writing the raw tables into `output_dir`
    async fn invoke(&self, source_tree: &Path, output_dir: &Path) -> HarvestResult<RawTables>;
}
