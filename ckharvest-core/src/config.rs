//! Configuration management

use crate::error::{ErrorContext, HarvestError, HarvestResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, usually read from `ckharvest.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub collector: CollectorConfig,
    pub fetch: FetchConfig,
    pub analyzer: AnalyzerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// GitHub GraphQL search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub api_url: String,
    /// Search qualifier string, e.g. `stars:>1000 language:java`
    pub search_query: String,
    /// Repositories requested per page (GitHub caps this at 100)
    pub page_size: usize,
    /// Repositories collected per run
    pub limit: usize,
    /// Pause between pages
    pub page_delay_ms: u64,
    pub timeout_seconds: u64,
    /// Where collected descriptors are written
    pub descriptors_path: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com/graphql".to_string(),
            search_query: "stars:>1000 language:java".to_string(),
            page_size: 20,
            limit: 1000,
            page_delay_ms: 3000,
            timeout_seconds: 30,
            descriptors_path: "repositories_1000_data.csv".to_string(),
        }
    }
}

/// Source archive download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Host serving `/{owner}/{name}/archive/refs/heads/{branch}.zip`
    pub archive_base_url: String,
    /// Branch references tried in order
    pub branches: Vec<String>,
    /// Bodies shorter than this are rejected even with a 2xx status
    pub min_archive_bytes: u64,
    pub timeout_seconds: u64,
    /// Wait before the single retry of a rate-limited request
    pub rate_limit_backoff_ms: u64,
    /// Upper bound applied to a server supplied `Retry-After`
    pub max_rate_limit_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            archive_base_url: "https://github.com".to_string(),
            branches: vec!["main".to_string(), "master".to_string()],
            min_archive_bytes: 64,
            timeout_seconds: 300,
            rate_limit_backoff_ms: 60_000,
            max_rate_limit_backoff_ms: 300_000,
            user_agent: format!("ckharvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// External analyzer invocation. Arguments may use the `{jar}`, `{source}`
/// and `{output}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub program: String,
    pub jar_path: Option<String>,
    pub args: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            jar_path: Some("ck.jar".to_string()),
            // CK: <project dir> <use jars> <max files per partition> <variables and fields> <output dir>
            args: vec![
                "-jar".to_string(),
                "{jar}".to_string(),
                "{source}".to_string(),
                "false".to_string(),
                "0".to_string(),
                "true".to_string(),
                "{output}/".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for per-repository workspaces; the system temp dir when unset
    pub work_dir: Option<String>,
    pub dataset_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            dataset_path: "repositories_ck_analysis.csv".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn work_root(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("ckharvest"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum repositories processed per run
    pub limit: Option<usize>,
    /// Skip repositories whose URL is already in the dataset
    pub resume: bool,
}

impl HarvestConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> HarvestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarvestError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: HarvestConfig = toml::from_str(&content).map_err(|e| HarvestError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> HarvestResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| HarvestError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content).map_err(|e| HarvestError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> HarvestResult<()> {
        if self.fetch.branches.is_empty() {
            return Err(invalid(
                "fetch.branches must list at least one branch",
                "Set fetch.branches, e.g. [\"main\", \"master\"]",
            ));
        }

        if self.fetch.branches.iter().any(|b| b.trim().is_empty()) {
            return Err(invalid(
                "fetch.branches must not contain empty names",
                "Remove blank entries from fetch.branches",
            ));
        }

        if self.collector.page_size == 0 || self.collector.page_size > 100 {
            return Err(invalid(
                "collector.page_size must be between 1 and 100",
                "Set collector.page_size to a value GitHub accepts",
            ));
        }

        if self.analyzer.program.trim().is_empty() {
            return Err(invalid(
                "analyzer.program must not be empty",
                "Set analyzer.program to the analyzer executable, e.g. \"java\"",
            ));
        }

        if !self.analyzer.args.iter().any(|a| a.contains("{source}"))
            || !self.analyzer.args.iter().any(|a| a.contains("{output}"))
        {
            return Err(invalid(
                "analyzer.args must reference both {source} and {output}",
                "Pass the extracted tree and output directory via placeholders",
            ));
        }

        if self.analyzer.args.iter().any(|a| a.contains("{jar}")) && self.analyzer.jar_path.is_none()
        {
            return Err(invalid(
                "analyzer.args use {jar} but analyzer.jar_path is not set",
                "Set analyzer.jar_path to the CK jar",
            ));
        }

        if self.storage.dataset_path.trim().is_empty() {
            return Err(invalid(
                "storage.dataset_path must not be empty",
                "Set storage.dataset_path to the output CSV",
            ));
        }

        if self.pipeline.limit == Some(0) {
            return Err(invalid(
                "pipeline.limit must be greater than 0",
                "Remove pipeline.limit to process every repository",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str, suggestion: &str) -> HarvestError {
    HarvestError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion(suggestion),
    }
}
