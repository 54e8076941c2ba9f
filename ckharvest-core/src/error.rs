//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

pub type HarvestResult<T> = Result<T, HarvestError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Why an archive download was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadFailure {
    /// Every branch reference answered 404
    NotFound,
    /// A non-success status other than 404 or a rate limit
    HttpStatus(u16),
    /// The body was shorter than the configured minimum
    TooSmall,
    /// The body did not carry a zip signature
    NotAnArchive,
    /// The request never produced a response
    Transport,
    /// The hosting platform refused the request because of its rate limit
    RateLimited,
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadFailure::NotFound => write!(f, "not found"),
            DownloadFailure::HttpStatus(code) => write!(f, "http status {}", code),
            DownloadFailure::TooSmall => write!(f, "archive too small"),
            DownloadFailure::NotAnArchive => write!(f, "not a zip archive"),
            DownloadFailure::Transport => write!(f, "transport error"),
            DownloadFailure::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// Main error type for the harvesting system
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Download error ({reason}): {message}")]
    Download {
        message: String,
        reason: DownloadFailure,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Extraction error: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Analysis error: {message}")]
    Analysis {
        message: String,
        exit_code: Option<i32>,
        context: ErrorContext,
    },

    #[error("Aggregation error: {message}")]
    Aggregation {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Setup error: {message}")]
    Setup {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarvestError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            HarvestError::Download { context, .. } => Some(context),
            HarvestError::Extraction { context, .. } => Some(context),
            HarvestError::Analysis { context, .. } => Some(context),
            HarvestError::Aggregation { context, .. } => Some(context),
            HarvestError::Persistence { context, .. } => Some(context),
            HarvestError::Setup { context, .. } => Some(context),
            HarvestError::Config { context, .. } => Some(context),
            HarvestError::Network { context, .. } => Some(context),
            HarvestError::Authentication { context, .. } => Some(context),
            HarvestError::RateLimit { context, .. } => Some(context),
            HarvestError::Io(_) | HarvestError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable by retrying the same request.
    ///
    /// Download errors are final: the fetcher has already walked every
    /// branch reference and spent its one rate-limit backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HarvestError::Network { .. } | HarvestError::RateLimit { .. }
        )
    }

    /// Only a setup error stops a batch before any repository is attempted
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::Setup { .. } | HarvestError::Config { .. })
    }

    /// Get retry delay in milliseconds for recoverable errors
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            HarvestError::Network { .. } => Some(1000),
            HarvestError::RateLimit { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// The download failure reason, if this is a download error
    pub fn download_failure(&self) -> Option<DownloadFailure> {
        match self {
            HarvestError::Download { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            HarvestError::Setup { .. } | HarvestError::Config { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Setup or configuration error"
                );
            }
            HarvestError::Network { .. } | HarvestError::RateLimit { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Network or rate limit error (may be recoverable)"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! extraction_error {
    ($msg:expr, $component:expr) => {
        $crate::HarvestError::Extraction {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::HarvestError::Extraction {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! aggregation_error {
    ($msg:expr, $component:expr) => {
        $crate::HarvestError::Aggregation {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::HarvestError::Aggregation {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! persistence_error {
    ($msg:expr, $component:expr) => {
        $crate::HarvestError::Persistence {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the dataset path is writable"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::HarvestError::Persistence {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the dataset path is writable"),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::HarvestError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'ckharvest config --init' to create default config"),
        }
    };
}
