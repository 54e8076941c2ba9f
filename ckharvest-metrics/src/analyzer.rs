//! CK analyzer invocation as an isolated child process

use async_trait::async_trait;
use ckharvest_core::{
    AnalyzerConfig, ErrorContext, HarvestError, HarvestResult, MetricsAnalyzer, RawTables,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const JAR_PLACEHOLDER: &str = "{jar}";
const SOURCE_PLACEHOLDER: &str = "{source}";
const OUTPUT_PLACEHOLDER: &str = "{output}";
const STDERR_TAIL_CHARS: usize = 2000;

/// Runs the configured analyzer command against an extracted tree
#[derive(Debug, Clone)]
pub struct CkAnalyzer {
    config: AnalyzerConfig,
}

impl CkAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Arguments with every placeholder substituted
    pub fn build_args(&self, source_tree: &Path, output_dir: &Path) -> Vec<String> {
        let jar = self.config.jar_path.clone().unwrap_or_default();
        let source = source_tree.to_string_lossy();
        let output = output_dir.to_string_lossy();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(JAR_PLACEHOLDER, &jar)
                    .replace(SOURCE_PLACEHOLDER, &source)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    fn uses_jar(&self) -> bool {
        self.config.args.iter().any(|a| a.contains(JAR_PLACEHOLDER))
    }

    fn resolve_program(&self) -> HarvestResult<PathBuf> {
        which::which(&self.config.program).map_err(|e| HarvestError::Setup {
            message: format!(
                "Analyzer executable '{}' not found: {}",
                self.config.program, e
            ),
            context: ErrorContext::new("ck_analyzer")
                .with_operation("verify")
                .with_suggestion("Install a Java runtime or set analyzer.program"),
        })
    }
}

#[async_trait]
impl MetricsAnalyzer for CkAnalyzer {
    async fn verify(&self) -> HarvestResult<()> {
        let program = self.resolve_program()?;
        debug!(program = %program.display(), "Analyzer executable resolved");

        if self.uses_jar() {
            let jar = self.config.jar_path.as_deref().unwrap_or_default();
            if jar.is_empty() || !Path::new(jar).is_file() {
                return Err(HarvestError::Setup {
                    message: format!("Analyzer jar '{}' not found", jar),
                    context: ErrorContext::new("ck_analyzer")
                        .with_operation("verify")
                        .with_suggestion("Download the CK jar and set analyzer.jar_path"),
                });
            }
        }

        Ok(())
    }

    async fn invoke(&self, source_tree: &Path, output_dir: &Path) -> HarvestResult<RawTables> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| HarvestError::Analysis {
                message: format!(
                    "Failed to create analyzer output directory {}: {}",
                    output_dir.display(),
                    e
                ),
                exit_code: None,
                context: ErrorContext::new("ck_analyzer").with_operation("invoke"),
            })?;

        let args = self.build_args(source_tree, output_dir);
        info!(
            program = %self.config.program,
            source = %source_tree.display(),
            "Running analyzer"
        );
        debug!(args = ?args, "Analyzer arguments");

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HarvestError::Analysis {
                message: format!("Failed to execute '{}': {}", self.config.program, e),
                exit_code: None,
                context: ErrorContext::new("ck_analyzer")
                    .with_operation("invoke")
                    .with_suggestion("Ensure the analyzer is installed and executable"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarvestError::Analysis {
                message: format!(
                    "Analyzer exited with {}: {}",
                    output.status,
                    tail(&stderr, STDERR_TAIL_CHARS)
                ),
                exit_code: output.status.code(),
                context: ErrorContext::new("ck_analyzer")
                    .with_operation("invoke")
                    .with_metadata("source", &source_tree.to_string_lossy()),
            });
        }

        debug!(
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Analyzer finished"
        );

        let tables = RawTables::in_dir(output_dir);
        let missing = tables.missing();
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(|p| p.file_name().unwrap_or_default().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(HarvestError::Analysis {
                message: format!("Analyzer exited successfully but did not write: {}", names),
                exit_code: output.status.code(),
                context: ErrorContext::new("ck_analyzer")
                    .with_operation("invoke")
                    .with_metadata("output_dir", &output_dir.to_string_lossy()),
            });
        }

        Ok(tables)
    }
}

/// Last `max_chars` characters of `text`, trimmed
fn tail(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim();
    if max_chars == 0 {
        return "";
    }
    match trimmed.char_indices().rev().nth(max_chars - 1) {
        Some((index, _)) => &trimmed[index..],
        None => trimmed,
    }
}
