//! ckharvest Repository - source acquisition for the analysis pipeline
//!
//! Collects repository metadata, downloads source archives with branch
//! fallback, unpacks them safely and owns the per-repository workspace

pub mod api;
pub mod extractor;
pub mod fetcher;
pub mod workspace;

pub use api::{CollectionSummary, FieldStats, GitHubCollector, MetadataCollector};
pub use extractor::*;
pub use fetcher::*;
pub use workspace::*;
