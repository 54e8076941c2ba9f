//! Source archive download with default-branch fallback

use async_trait::async_trait;
use ckharvest_core::{
    ArchiveFetcher, DownloadFailure, ErrorContext, FetchConfig, HarvestError, HarvestResult,
    RepositoryDescriptor,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

const ZIP_SIGNATURE: &[u8] = b"PK";

/// Downloads `{base}/{owner}/{name}/archive/refs/heads/{branch}.zip`,
/// trying each configured branch in order
#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

/// Result of one GET against one branch reference
#[derive(Debug)]
enum Attempt {
    Downloaded {
        bytes: u64,
    },
    Rejected {
        reason: DownloadFailure,
        detail: String,
    },
    RateLimited {
        retry_after_ms: Option<u64>,
    },
}

/// Where streaming a response body broke down
enum BodyError {
    Read(reqwest::Error),
    Write(std::io::Error),
}

/// Size and leading bytes of a streamed body
struct StreamedBody {
    bytes: u64,
    head: Vec<u8>,
}

impl HttpArchiveFetcher {
    /// Create a fetcher; `token` is sent as a bearer token when present
    pub fn new(config: FetchConfig, token: Option<String>) -> HarvestResult<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| HarvestError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("archive_fetcher").with_operation("create_client"),
            })?,
        );

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                HarvestError::Config {
                    message: format!("Invalid access token: {}", e),
                    source: Some(Box::new(e)),
                    context: ErrorContext::new("archive_fetcher")
                        .with_operation("create_client"),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| HarvestError::Config {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("archive_fetcher").with_operation("create_client"),
            })?;

        Ok(Self { client, config })
    }

    /// Archive URL for one branch reference
    pub fn archive_url(
        &self,
        descriptor: &RepositoryDescriptor,
        branch: &str,
    ) -> HarvestResult<Url> {
        let raw = format!(
            "{}/{}/{}/archive/refs/heads/{}.zip",
            self.config.archive_base_url.trim_end_matches('/'),
            descriptor.owner,
            descriptor.name,
            branch
        );

        Url::parse(&raw).map_err(|e| HarvestError::Download {
            message: format!("Invalid archive URL {}: {}", raw, e),
            reason: DownloadFailure::Transport,
            source: Some(Box::new(e)),
            context: ErrorContext::new("archive_fetcher")
                .with_operation("archive_url")
                .with_metadata("repository", &descriptor.full_name()),
        })
    }

    async fn attempt(&self, url: &Url, destination: &Path) -> HarvestResult<Attempt> {
        debug!(url = %url, "Requesting archive");

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Rejected {
                    reason: DownloadFailure::Transport,
                    detail: e.to_string(),
                })
            }
        };

        let status = response.status();
        if is_rate_limited(status, response.headers()) {
            return Ok(Attempt::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let reason = if status == StatusCode::NOT_FOUND {
                DownloadFailure::NotFound
            } else {
                DownloadFailure::HttpStatus(status.as_u16())
            };
            return Ok(Attempt::Rejected {
                reason,
                detail: format!("HTTP {}", status.as_u16()),
            });
        }

        let partial = partial_path(destination);
        let rejected = match stream_body(response, &partial).await {
            Ok(body) if body.bytes < self.config.min_archive_bytes => Attempt::Rejected {
                reason: DownloadFailure::TooSmall,
                detail: format!(
                    "{} bytes, expected at least {}",
                    body.bytes, self.config.min_archive_bytes
                ),
            },
            Ok(body) if !body.head.starts_with(ZIP_SIGNATURE) => Attempt::Rejected {
                reason: DownloadFailure::NotAnArchive,
                detail: "body has no zip signature".to_string(),
            },
            Ok(body) => {
                if let Err(e) = tokio::fs::rename(&partial, destination).await {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(write_failed(destination, e));
                }
                return Ok(Attempt::Downloaded { bytes: body.bytes });
            }
            Err(BodyError::Read(e)) => Attempt::Rejected {
                reason: DownloadFailure::Transport,
                detail: format!("Failed to read body: {}", e),
            },
            Err(BodyError::Write(e)) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(write_failed(destination, e));
            }
        };

        let _ = tokio::fs::remove_file(&partial).await;
        Ok(rejected)
    }

    /// One branch reference, with a single backoff retry on a rate limit
    async fn attempt_with_backoff(&self, url: &Url, destination: &Path) -> HarvestResult<Attempt> {
        match self.attempt(url, destination).await? {
            Attempt::RateLimited { retry_after_ms } => {
                let wait_ms = retry_after_ms
                    .unwrap_or(self.config.rate_limit_backoff_ms)
                    .min(self.config.max_rate_limit_backoff_ms);
                warn!(url = %url, wait_ms, "Rate limited, backing off before a single retry");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                self.attempt(url, destination).await
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(
        &self,
        descriptor: &RepositoryDescriptor,
        destination: &Path,
    ) -> HarvestResult<PathBuf> {
        let repository = descriptor.full_name();
        let mut failures: Vec<String> = Vec::new();
        let mut last_reason = DownloadFailure::NotFound;
        let mut all_not_found = true;

        for branch in &self.config.branches {
            let url = self.archive_url(descriptor, branch)?;

            match self.attempt_with_backoff(&url, destination).await? {
                Attempt::Downloaded { bytes } => {
                    info!(
                        repository = %repository,
                        branch = %branch,
                        bytes,
                        "Archive downloaded"
                    );
                    return Ok(destination.to_path_buf());
                }
                Attempt::RateLimited { .. } => {
                    return Err(HarvestError::Download {
                        message: format!(
                            "Rate limited by the hosting platform while downloading {} ({})",
                            repository, branch
                        ),
                        reason: DownloadFailure::RateLimited,
                        source: None,
                        context: ErrorContext::new("archive_fetcher")
                            .with_operation("fetch")
                            .with_metadata("repository", &repository)
                            .with_suggestion("Wait for the rate limit window to reset")
                            .with_suggestion("Provide GITHUB_TOKEN for a higher limit"),
                    });
                }
                Attempt::Rejected { reason, detail } => {
                    debug!(
                        repository = %repository,
                        branch = %branch,
                        reason = %reason,
                        detail = %detail,
                        "Branch reference failed"
                    );
                    all_not_found &= reason == DownloadFailure::NotFound;
                    last_reason = reason;
                    failures.push(format!("{}: {}", branch, detail));
                }
            }
        }

        Err(HarvestError::Download {
            message: format!(
                "No archive for {} after trying {} branch reference(s): {}",
                repository,
                self.config.branches.len(),
                failures.join("; ")
            ),
            reason: if all_not_found {
                DownloadFailure::NotFound
            } else {
                last_reason
            },
            source: None,
            context: ErrorContext::new("archive_fetcher")
                .with_operation("fetch")
                .with_metadata("repository", &repository)
                .with_suggestion("Check that the repository exists and its default branch"),
        })
    }
}

/// Sibling of the destination that holds the body until it passes validation
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Write the body to `partial` chunk by chunk, keeping only its leading bytes in memory
async fn stream_body(
    mut response: reqwest::Response,
    partial: &Path,
) -> Result<StreamedBody, BodyError> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(BodyError::Write)?;
    let mut body = StreamedBody {
        bytes: 0,
        head: Vec::with_capacity(ZIP_SIGNATURE.len()),
    };

    while let Some(chunk) = response.chunk().await.map_err(BodyError::Read)? {
        let wanted = ZIP_SIGNATURE.len().saturating_sub(body.head.len());
        body.head
            .extend_from_slice(&chunk[..wanted.min(chunk.len())]);
        file.write_all(&chunk).await.map_err(BodyError::Write)?;
        body.bytes += chunk.len() as u64;
    }

    file.flush().await.map_err(BodyError::Write)?;
    Ok(body)
}

fn write_failed(destination: &Path, e: std::io::Error) -> HarvestError {
    HarvestError::Download {
        message: format!(
            "Failed to write archive to {}: {}",
            destination.display(),
            e
        ),
        reason: DownloadFailure::Transport,
        source: Some(Box::new(e)),
        context: ErrorContext::new("archive_fetcher").with_operation("write_archive"),
    }
}

/// 429, or a 403 that reports an exhausted quota
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|seconds| seconds.saturating_mul(1000))
}
