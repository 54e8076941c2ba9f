//! ckharvest Metrics - external analyzer invocation and metric aggregation
//!
//! The analyzer is treated as a black box: it is run as a child process and
//! its four CSV tables are reduced to one summary per repository

pub mod aggregator;
pub mod analyzer;

pub use aggregator::*;
pub use analyzer::*;
