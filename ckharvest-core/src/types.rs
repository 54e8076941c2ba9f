//! Core data type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Repository metadata as returned by the metadata collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    pub owner: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub stars: u64,
    pub age_days: i64,
    pub primary_language: String,
    pub total_releases: u64,
    pub created_at: String,
}

impl RepositoryDescriptor {
    /// Column order of the descriptor CSV
    pub const HEADER: [&'static str; 9] = [
        "name",
        "owner",
        "url",
        "description",
        "stars",
        "age_days",
        "primary_language",
        "total_releases",
        "created_at",
    ];

    /// `owner/name`, used to identify the repository in logs and reports
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.owner.clone(),
            self.url.clone(),
            self.description.clone(),
            self.stars.to_string(),
            self.age_days.to_string(),
            self.primary_language.clone(),
            self.total_releases.to_string(),
            self.created_at.clone(),
        ]
    }
}

/// Paths of the four tables the analyzer must produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTables {
    pub class: PathBuf,
    pub method: PathBuf,
    pub field: PathBuf,
    pub variable: PathBuf,
}

impl RawTables {
    /// File names of the tables, in class/method/field/variable order
    pub const FILE_NAMES: [&'static str; 4] =
        ["class.csv", "method.csv", "field.csv", "variable.csv"];

    /// Expected table locations inside an analyzer output directory
    pub fn in_dir(output_dir: &Path) -> Self {
        Self {
            class: output_dir.join(Self::FILE_NAMES[0]),
            method: output_dir.join(Self::FILE_NAMES[1]),
            field: output_dir.join(Self::FILE_NAMES[2]),
            variable: output_dir.join(Self::FILE_NAMES[3]),
        }
    }

    pub fn paths(&self) -> [&Path; 4] {
        [&self.class, &self.method, &self.field, &self.variable]
    }

    /// Tables that do not exist on disk
    pub fn missing(&self) -> Vec<&Path> {
        self.paths().into_iter().filter(|p| !p.is_file()).collect()
    }
}

/// Aggregated metrics for one repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub total_classes: u64,
    pub total_methods: u64,
    pub total_fields: u64,
    pub total_variables: u64,
    pub avg_wmc: f64,
    pub avg_cbo: f64,
    pub avg_lcom: f64,
    pub avg_dit: f64,
    pub avg_noc: f64,
    pub avg_rfc: f64,
    pub avg_loc: f64,
    pub avg_cc: f64,
}

/// The row persisted to the dataset for one repository
#[derive(Debug, Clone, PartialEq)]
pub struct RepositorySummary {
    pub descriptor: RepositoryDescriptor,
    pub metrics: MetricSummary,
}

impl RepositorySummary {
    /// Dataset header; `to_record` emits values in exactly this order
    pub const HEADER: [&'static str; 21] = [
        "name",
        "owner",
        "url",
        "description",
        "stars",
        "age_days",
        "primary_language",
        "total_releases",
        "created_at",
        "total_classes",
        "total_methods",
        "total_fields",
        "total_variables",
        "avg_wmc",
        "avg_cbo",
        "avg_lcom",
        "avg_dit",
        "avg_noc",
        "avg_rfc",
        "avg_loc",
        "avg_cc",
    ];

    pub fn new(descriptor: RepositoryDescriptor, metrics: MetricSummary) -> Self {
        Self {
            descriptor,
            metrics,
        }
    }

    pub fn to_record(&self) -> Vec<String> {
        let m = &self.metrics;
        let mut record = self.descriptor.to_record();
        record.extend([
            m.total_classes.to_string(),
            m.total_methods.to_string(),
            m.total_fields.to_string(),
            m.total_variables.to_string(),
        ]);
        record.extend(
            [
                m.avg_wmc, m.avg_cbo, m.avg_lcom, m.avg_dit, m.avg_noc, m.avg_rfc, m.avg_loc,
                m.avg_cc,
            ]
            .into_iter()
            .map(format_average),
        );
        record
    }
}

/// Floats always carry a decimal point so the column reads as numeric
fn format_average(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Processing stage of one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Pending,
    Fetching,
    Extracting,
    Analyzing,
    Aggregating,
    Writing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// The stage that follows on success; terminal stages have none
    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Pending => Some(PipelineStage::Fetching),
            PipelineStage::Fetching => Some(PipelineStage::Extracting),
            PipelineStage::Extracting => Some(PipelineStage::Analyzing),
            PipelineStage::Analyzing => Some(PipelineStage::Aggregating),
            PipelineStage::Aggregating => Some(PipelineStage::Writing),
            PipelineStage::Writing => Some(PipelineStage::Done),
            PipelineStage::Done | PipelineStage::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Pending => "PENDING",
            PipelineStage::Fetching => "FETCHING",
            PipelineStage::Extracting => "EXTRACTING",
            PipelineStage::Analyzing => "ANALYZING",
            PipelineStage::Aggregating => "AGGREGATING",
            PipelineStage::Writing => "WRITING",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A repository that ended in the FAILED state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub repository: String,
    pub stage: PipelineStage,
    pub message: String,
}

/// Outcome of processing one repository
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryOutcome {
    /// Row written and workspace removed
    Succeeded(RepositorySummary),
    /// Row written, but some workspace paths could not be removed
    Partial {
        summary: RepositorySummary,
        leftover_paths: Vec<PathBuf>,
    },
    Failed(StageFailure),
    /// Already present in the dataset
    Skipped,
}

/// Running counts for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub skipped: usize,
    pub failures: Vec<StageFailure>,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &RepositoryOutcome) {
        match outcome {
            RepositoryOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
            RepositoryOutcome::Succeeded(_) => self.succeeded += 1,
            RepositoryOutcome::Partial { .. } => self.partial += 1,
            RepositoryOutcome::Failed(failure) => self.failures.push(failure.clone()),
        }
        self.attempted += 1;
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Rows appended to the dataset during this batch
    pub fn rows_written(&self) -> usize {
        self.succeeded + self.partial
    }

    /// Failure counts keyed by stage, in pipeline order
    pub fn failures_by_stage(&self) -> Vec<(PipelineStage, usize)> {
        let mut counts: Vec<(PipelineStage, usize)> = Vec::new();
        for failure in &self.failures {
            match counts.iter_mut().find(|(stage, _)| *stage == failure.stage) {
                Some((_, count)) => *count += 1,
                None => counts.push((failure.stage, 1)),
            }
        }
        counts.sort_by_key(|(stage, _)| *stage as u8);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: "demo".to_string(),
            owner: "acme".to_string(),
            url: "https://github.com/acme/demo".to_string(),
            description: "a, quoted \"demo\"".to_string(),
            stars: 1200,
            age_days: 400,
            primary_language: "Java".to_string(),
            total_releases: 3,
            created_at: "2023-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_summary_record_matches_header_order() {
        let metrics = MetricSummary {
            total_classes: 2,
            avg_cbo: 5.0,
            avg_wmc: 2.5,
            ..Default::default()
        };
        let record = RepositorySummary::new(descriptor(), metrics).to_record();

        assert_eq!(record.len(), RepositorySummary::HEADER.len());
        let column = |name: &str| {
            let index = RepositorySummary::HEADER
                .iter()
                .position(|h| *h == name)
                .unwrap();
            record[index].clone()
        };
        assert_eq!(column("name"), "demo");
        assert_eq!(column("stars"), "1200");
        assert_eq!(column("total_classes"), "2");
        assert_eq!(column("avg_cbo"), "5.0");
        assert_eq!(column("avg_wmc"), "2.5");
        assert_eq!(column("avg_cc"), "0.0");
    }

    #[test]
    fn test_summary_header_starts_with_descriptor_header() {
        assert_eq!(
            &RepositorySummary::HEADER[..RepositoryDescriptor::HEADER.len()],
            &RepositoryDescriptor::HEADER[..]
        );
    }

    #[test]
    fn test_stage_progression() {
        let mut stage = PipelineStage::Pending;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            visited.push(stage);
        }
        assert_eq!(visited.last(), Some(&PipelineStage::Done));
        assert_eq!(visited.len(), 7);
        assert!(PipelineStage::Failed.next().is_none());
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Writing.is_terminal());
        assert_eq!(PipelineStage::Analyzing.to_string(), "ANALYZING");
    }

    #[test]
    fn test_batch_report_counts() {
        let summary = RepositorySummary::new(descriptor(), MetricSummary::default());
        let mut report = BatchReport::default();
        report.record(&RepositoryOutcome::Succeeded(summary.clone()));
        report.record(&RepositoryOutcome::Failed(StageFailure {
            repository: "acme/broken".to_string(),
            stage: PipelineStage::Analyzing,
            message: "exit status 1".to_string(),
        }));
        report.record(&RepositoryOutcome::Partial {
            summary,
            leftover_paths: vec![PathBuf::from("/tmp/x")],
        });
        report.record(&RepositoryOutcome::Skipped);

        assert_eq!(report.attempted, 3);
        assert_eq!(report.rows_written(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.failures_by_stage(),
            vec![(PipelineStage::Analyzing, 1)]
        );
    }

    #[test]
    fn test_raw_tables_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tables = RawTables::in_dir(dir.path());
        assert_eq!(tables.missing().len(), 4);

        std::fs::write(&tables.class, "class\n").unwrap();
        std::fs::write(&tables.method, "method\n").unwrap();
        std::fs::write(&tables.field, "field\n").unwrap();
        assert_eq!(tables.missing(), vec![tables.variable.as_path()]);
    }
}
