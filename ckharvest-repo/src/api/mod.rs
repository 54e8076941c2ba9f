//! Metadata collection from the hosting platform
//!
//! The pipeline only needs an ordered list of [`RepositoryDescriptor`]s; this
//! module produces it from GitHub's GraphQL search API.

use async_trait::async_trait;
use ckharvest_core::{ErrorContext, HarvestError, HarvestResult, RepositoryDescriptor};
use serde::Serialize;
use std::time::Duration;

pub mod github;


pub use github::GitHubCollector;

/// Source of repository descriptors, in the order they should be processed
#[async_trait]
pub trait MetadataCollector: Send + Sync {
    async fn collect(&self, limit: usize) -> HarvestResult<Vec<RepositoryDescriptor>>;
}

/// Helper function to create an HTTP client with common configuration
pub(crate) fn create_http_client(
    token: &str,
    user_agent: &str,
    timeout_seconds: u64,
) -> HarvestResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(user_agent).map_err(|e| HarvestError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );

    let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| HarvestError::Config {
            message: format!("Invalid access token: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client")
                .with_operation("create_client")
                .with_suggestion("Check GITHUB_TOKEN for stray whitespace"),
        })?;
    auth.set_sensitive(true);
    headers.insert(reqwest::header::AUTHORIZATION, auth);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| HarvestError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Map a non-success response to the error taxonomy
pub(crate) async fn handle_response_error(
    response: reqwest::Response,
    operation: &str,
) -> HarvestError {
    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|s| s.saturating_mul(1000));
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        body
    };

    match status.as_u16() {
        401 => HarvestError::Authentication {
            message: format!("Token rejected (HTTP 401): {}", detail),
            context: ErrorContext::new("metadata_collector")
                .with_operation(operation)
                .with_suggestion("Check that GITHUB_TOKEN is valid and not expired"),
        },
        403 | 429 => HarvestError::RateLimit {
            message: format!(
                "Rate limit reached or insufficient permissions (HTTP {}): {}",
                status.as_u16(),
                detail
            ),
            retry_after_ms,
            context: ErrorContext::new("metadata_collector")
                .with_operation(operation)
                .with_suggestion("Wait a few minutes or check the token permissions"),
        },
        code => HarvestError::Network {
            message: format!("HTTP {} from metadata API: {}", code, detail),
            source: None,
            context: ErrorContext::new("metadata_collector")
                .with_operation(operation)
                .with_suggestion(if code >= 500 {
                    "Temporary problem on the GitHub side, try again later"
                } else {
                    "Check the API URL and the query"
                }),
        },
    }
}

/// Descriptive statistics over the collected repositories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub total: usize,
    pub age_days: FieldStats,
    pub stars: FieldStats,
    pub releases: FieldStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    /// Upper median, `sorted[len / 2]`
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self {
                median: 0.0,
                mean: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let sum: f64 = values.iter().sum();
        Self {
            median: values[values.len() / 2],
            mean: sum / values.len() as f64,
            min: values[0],
            max: values[values.len() - 1],
        }
    }
}

impl CollectionSummary {
    pub fn from_descriptors(descriptors: &[RepositoryDescriptor]) -> Self {
        Self {
            total: descriptors.len(),
            age_days: FieldStats::from_values(
                descriptors.iter().map(|d| d.age_days as f64).collect(),
            ),
            stars: FieldStats::from_values(descriptors.iter().map(|d| d.stars as f64).collect()),
            releases: FieldStats::from_values(
                descriptors.iter().map(|d| d.total_releases as f64).collect(),
            ),
        }
    }
}
