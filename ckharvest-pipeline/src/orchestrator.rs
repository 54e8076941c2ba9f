//! Per-repository state machine and batch driver

use crate::dataset::{read_dataset_urls, DatasetWriter};
use ckharvest_core::{
    log_operation_start, log_operation_success, performance, ArchiveFetcher, BatchReport,
    ErrorContext, HarvestConfig, HarvestError, HarvestResult, MetricSummary, MetricsAnalyzer,
    PipelineStage, RepositoryDescriptor, RepositoryOutcome, RepositorySummary, StageFailure,
};
use ckharvest_metrics::{CkAnalyzer, MetricAggregator};
use ckharvest_repo::{ArchiveExtractor, HttpArchiveFetcher, Workspace};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current stage of one repository, with logged transitions
struct StageTracker {
    repository: String,
    stage: PipelineStage,
}

impl StageTracker {
    fn new(repository: String) -> Self {
        Self {
            repository,
            stage: PipelineStage::Pending,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            debug!(
                repository = %self.repository,
                from = %self.stage,
                to = %next,
                "Stage transition"
            );
            self.stage = next;
        }
    }

    fn fail(self, error: &HarvestError) -> RepositoryOutcome {
        debug_assert!(!self.stage.is_terminal());
        error.log();
        warn!(
            repository = %self.repository,
            stage = %self.stage,
            "Repository failed"
        );
        RepositoryOutcome::Failed(StageFailure {
            repository: self.repository,
            stage: self.stage,
            message: error.to_string(),
        })
    }
}

/// Runs repositories one after another through fetch, extraction,
/// analysis, aggregation and persistence.
pub struct PipelineOrchestrator {
    fetcher: Box<dyn ArchiveFetcher>,
    extractor: ArchiveExtractor,
    analyzer: Box<dyn MetricsAnalyzer>,
    aggregator: MetricAggregator,
    writer: DatasetWriter,
    work_root: PathBuf,
    limit: Option<usize>,
    resume: bool,
}

impl PipelineOrchestrator {
    pub fn new(
        fetcher: Box<dyn ArchiveFetcher>,
        analyzer: Box<dyn MetricsAnalyzer>,
        writer: DatasetWriter,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            extractor: ArchiveExtractor::new(),
            analyzer,
            aggregator: MetricAggregator::new(),
            writer,
            work_root: work_root.into(),
            limit: None,
            resume: false,
        }
    }

    /// Orchestrator wired to the HTTP fetcher and the CK analyzer
    pub fn from_config(config: &HarvestConfig, token: Option<String>) -> HarvestResult<Self> {
        let fetcher = HttpArchiveFetcher::new(config.fetch.clone(), token)?;
        let analyzer = CkAnalyzer::new(config.analyzer.clone());

        Ok(Self::new(
            Box::new(fetcher),
            Box::new(analyzer),
            DatasetWriter::new(&config.storage.dataset_path),
            config.storage.work_root(),
        )
        .with_limit(config.pipeline.limit)
        .with_resume(config.pipeline.resume))
    }

    /// Process at most `limit` repositories; skipped ones do not count
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn dataset_path(&self) -> &Path {
        self.writer.path()
    }

    /// Process `repositories` in order.
    ///
    /// Only setup problems are returned as errors; a repository that fails at
    /// any stage is recorded in the report and the batch moves on.
    pub async fn run(&self, repositories: &[RepositoryDescriptor]) -> HarvestResult<BatchReport> {
        log_operation_start!(
            "pipeline_batch",
            repositories = repositories.len(),
            limit = ?self.limit
        );

        self.analyzer.verify().await?;

        std::fs::create_dir_all(&self.work_root).map_err(|e| HarvestError::Setup {
            message: format!(
                "Failed to create work directory {}: {}",
                self.work_root.display(),
                e
            ),
            context: ErrorContext::new("pipeline_orchestrator")
                .with_operation("run")
                .with_suggestion("Set storage.work_dir to a writable directory"),
        })?;

        let mut known_urls = if self.resume {
            let urls = read_dataset_urls(self.writer.path())?;
            info!(existing = urls.len(), "Resuming against existing dataset");
            urls
        } else {
            Default::default()
        };

        let mut report = BatchReport::default();
        let total = self.limit.map_or(repositories.len(), |l| l.min(repositories.len()));

        for descriptor in repositories {
            if self.limit.is_some_and(|limit| report.attempted >= limit) {
                info!(limit = ?self.limit, "Repository limit reached");
                break;
            }

            if self.resume && known_urls.contains(&descriptor.url) {
                debug!(repository = %descriptor.full_name(), "Already in dataset, skipping");
                report.record(&RepositoryOutcome::Skipped);
                continue;
            }

            info!(
                index = report.attempted + 1,
                total,
                repository = %descriptor.full_name(),
                "Processing repository"
            );

            let outcome =
                performance::measure_async("process_repository", self.process(descriptor)).await;
            match &outcome {
                RepositoryOutcome::Succeeded(_) => {
                    info!(repository = %descriptor.full_name(), "Repository analyzed");
                }
                RepositoryOutcome::Partial { leftover_paths, .. } => {
                    warn!(
                        repository = %descriptor.full_name(),
                        leftover = leftover_paths.len(),
                        "Repository analyzed but workspace cleanup was incomplete"
                    );
                }
                RepositoryOutcome::Failed(_) | RepositoryOutcome::Skipped => {}
            }

            if matches!(
                outcome,
                RepositoryOutcome::Succeeded(_) | RepositoryOutcome::Partial { .. }
            ) {
                known_urls.insert(descriptor.url.clone());
            }
            report.record(&outcome);
        }

        log_operation_success!(
            "pipeline_batch",
            attempted = report.attempted,
            rows_written = report.rows_written(),
            failed = report.failed(),
            skipped = report.skipped
        );

        Ok(report)
    }

    /// Drive one repository to DONE or FAILED. Never returns an error.
    pub async fn process(&self, descriptor: &RepositoryDescriptor) -> RepositoryOutcome {
        let mut tracker = StageTracker::new(descriptor.full_name());
        tracker.advance();

        let mut workspace = match Workspace::create(&self.work_root, descriptor) {
            Ok(workspace) => workspace,
            Err(e) => return tracker.fail(&e),
        };

        let measured = self.measure(descriptor, &workspace, &mut tracker).await;
        let cleanup = workspace.cleanup();

        let metrics = match measured {
            Ok(metrics) => metrics,
            Err(e) => return tracker.fail(&e),
        };

        tracker.advance();
        let summary = RepositorySummary::new(descriptor.clone(), metrics);
        if let Err(e) = self.writer.append(&summary) {
            return tracker.fail(&e);
        }
        tracker.advance();

        if cleanup.is_clean() {
            RepositoryOutcome::Succeeded(summary)
        } else {
            RepositoryOutcome::Partial {
                summary,
                leftover_paths: cleanup.failed_paths,
            }
        }
    }

    async fn measure(
        &self,
        descriptor: &RepositoryDescriptor,
        workspace: &Workspace,
        tracker: &mut StageTracker,
    ) -> HarvestResult<MetricSummary> {
        let archive = self
            .fetcher
            .fetch(descriptor, &workspace.archive_path())
            .await?;

        tracker.advance();
        let source_tree = performance::measure_sync("extract_archive", || {
            self.extractor.extract(&archive, &workspace.source_dir())
        })?;

        tracker.advance();
        let tables = self
            .analyzer
            .invoke(&source_tree, &workspace.output_dir())
            .await?;

        tracker.advance();
        self.aggregator.aggregate(&tables)
    }
}
