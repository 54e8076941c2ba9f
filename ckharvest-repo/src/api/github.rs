//! GitHub GraphQL search client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ckharvest_core::{
    retry_async, CollectorConfig, ErrorContext, HarvestError, HarvestResult,
    RepositoryDescriptor, RetryConfig,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{create_http_client, handle_response_error, MetadataCollector};

const SEARCH_QUERY: &str = r#"
query($searchQuery: String!, $first: Int!, $after: String) {
    search(query: $searchQuery, type: REPOSITORY, first: $first, after: $after) {
        pageInfo {
            hasNextPage
            endCursor
        }
        nodes {
            ... on Repository {
                name
                owner {
                    login
                }
                stargazerCount
                createdAt
                primaryLanguage {
                    name
                }
                releases {
                    totalCount
                }
                url
                description
            }
        }
    }
}
"#;

/// Paginated repository search
pub struct GitHubCollector {
    client: reqwest::Client,
    config: CollectorConfig,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SearchData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// One search hit; everything is optional because non-repository hits
/// arrive as empty objects
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepositoryNode {
    pub name: Option<String>,
    pub owner: Option<Owner>,
    pub stargazer_count: Option<u64>,
    pub created_at: Option<String>,
    pub primary_language: Option<Language>,
    pub releases: Option<Releases>,
    pub url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Owner {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Language {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Releases {
    pub total_count: u64,
}

struct Page {
    descriptors: Vec<RepositoryDescriptor>,
    next_cursor: Option<String>,
}

impl GitHubCollector {
    /// Create a new collector authenticated with `token`
    pub fn new(config: CollectorConfig, token: &str) -> HarvestResult<Self> {
        if token.trim().is_empty() {
            return Err(HarvestError::Authentication {
                message: "GitHub token not found".to_string(),
                context: ErrorContext::new("github_collector")
                    .with_operation("new")
                    .with_suggestion("Set GITHUB_TOKEN in the environment or in .env"),
            });
        }

        let user_agent = format!("ckharvest/{}", env!("CARGO_PKG_VERSION"));
        let client = create_http_client(token, &user_agent, config.timeout_seconds)?;

        info!("Created GitHub collector for {}", config.api_url);

        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy used for each page request
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_page(&self, cursor: Option<&str>, now: DateTime<Utc>) -> HarvestResult<Page> {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "searchQuery": self.config.search_query,
                "first": self.config.page_size,
                "after": cursor,
            }
        });

        debug!(cursor = ?cursor, "Requesting search page");

        let response = self
            .client
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::Network {
                message: format!("Failed to reach GitHub GraphQL API: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("github_collector").with_operation("fetch_page"),
            })?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "fetch_page").await);
        }

        let parsed: GraphQlResponse = response.json().await.map_err(|e| HarvestError::Network {
            message: format!("Failed to parse search response: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("github_collector").with_operation("fetch_page"),
        })?;

        let search = match (parsed.data, parsed.errors) {
            (Some(data), _) => data.search,
            (None, errors) => {
                let messages = errors
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(HarvestError::Network {
                    message: format!("GraphQL query returned no data: {}", messages),
                    source: None,
                    context: ErrorContext::new("github_collector")
                        .with_operation("fetch_page")
                        .with_suggestion("Check collector.search_query"),
                });
            }
        };

        let mut descriptors = Vec::with_capacity(search.nodes.len());
        for node in search.nodes.into_iter().flatten() {
            let label = node.name.clone().unwrap_or_else(|| "Unknown".to_string());
            match descriptor_from_node(node, now) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => warn!(repository = %label, error = %e, "Skipping search result"),
            }
        }

        let next_cursor = if search.page_info.has_next_page {
            search.page_info.end_cursor
        } else {
            None
        };

        Ok(Page {
            descriptors,
            next_cursor,
        })
    }
}

#[async_trait]
impl MetadataCollector for GitHubCollector {
    async fn collect(&self, limit: usize) -> HarvestResult<Vec<RepositoryDescriptor>> {
        info!(limit, query = %self.config.search_query, "Starting metadata collection");

        let now = Utc::now();
        let mut repositories: Vec<RepositoryDescriptor> = Vec::with_capacity(limit);
        let mut cursor: Option<String> = None;

        while repositories.len() < limit {
            let page = retry_async(
                || self.fetch_page(cursor.as_deref(), now),
                &self.retry,
                "github_search_page",
            )
            .await?;

            let remaining = limit - repositories.len();
            repositories.extend(page.descriptors.into_iter().take(remaining));

            if repositories.len() % 20 == 0 || repositories.len() >= limit {
                info!(
                    collected = repositories.len(),
                    limit,
                    "Collected {}/{} repositories ({:.1}%)",
                    repositories.len(),
                    limit,
                    repositories.len() as f64 / limit as f64 * 100.0
                );
            }

            match page.next_cursor {
                Some(next) if repositories.len() < limit => cursor = Some(next),
                _ => break,
            }

            tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
        }

        info!(total = repositories.len(), "Metadata collection finished");
        Ok(repositories)
    }
}

/// Convert a search hit into a descriptor, measuring age against `now`
pub(crate) fn descriptor_from_node(
    node: RepositoryNode,
    now: DateTime<Utc>,
) -> HarvestResult<RepositoryDescriptor> {
    let missing = |field: &str| HarvestError::Network {
        message: format!("Search result is missing '{}'", field),
        source: None,
        context: ErrorContext::new("github_collector").with_operation("descriptor_from_node"),
    };

    let name = node.name.ok_or_else(|| missing("name"))?;
    let owner = node.owner.ok_or_else(|| missing("owner"))?.login;
    let url = node.url.ok_or_else(|| missing("url"))?;
    let created_at = node.created_at.ok_or_else(|| missing("createdAt"))?;

    let created = DateTime::parse_from_rfc3339(&created_at).map_err(|e| HarvestError::Network {
        message: format!("Invalid createdAt '{}': {}", created_at, e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("github_collector").with_operation("descriptor_from_node"),
    })?;

    Ok(RepositoryDescriptor {
        name,
        owner,
        url,
        description: node.description.unwrap_or_default(),
        stars: node.stargazer_count.unwrap_or(0),
        age_days: (now - created.with_timezone(&Utc)).num_days(),
        primary_language: node
            .primary_language
            .map(|l| l.name)
            .unwrap_or_else(|| "Unknown".to_string()),
        total_releases: node.releases.map(|r| r.total_count).unwrap_or(0),
        created_at,
    })
}
