//! ckharvest Pipeline - per-repository orchestration and dataset persistence
//!
//! Drives each repository through fetch, extraction, analysis and
//! aggregation in order, appending one row per success to the dataset,
//! and summarizes a finished dataset as a markdown report.

pub mod dataset;
pub mod orchestrator;
pub mod report;

pub use dataset::*;
pub use orchestrator::*;
pub use report::*;
