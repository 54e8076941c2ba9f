//! End-to-end pipeline tests: mock archive host, fixture analyzer, real
//! extraction, aggregation and dataset writing

use async_trait::async_trait;
use ckharvest_core::{
    ErrorContext, FetchConfig, HarvestError, HarvestResult, MetricsAnalyzer, PipelineStage,
    RawTables, RepositoryDescriptor, RepositorySummary,
};
use ckharvest_pipeline::{DatasetWriter, PipelineOrchestrator};
use ckharvest_repo::HttpArchiveFetcher;
use std::io::{Cursor, Write};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

const CLASS_TABLE: &str = "file,class,type,cbo,wmc\nA.java,A,class,4,1\nB.java,B,class,6,2\n";

/// Stands in for CK: copies the tables bundled at `<root>/metrics/` in the
/// extracted tree, and fails like CK would when they are absent.
struct FixtureAnalyzer;

#[async_trait]
impl MetricsAnalyzer for FixtureAnalyzer {
    async fn invoke(&self, source_tree: &Path, output_dir: &Path) -> HarvestResult<RawTables> {
        let analysis_failed = |message: &str| HarvestError::Analysis {
            message: message.to_string(),
            exit_code: Some(1),
            context: ErrorContext::new("fixture_analyzer"),
        };

        let root = std::fs::read_dir(source_tree)?
            .next()
            .ok_or_else(|| analysis_failed("empty source tree"))??
            .path();
        let metrics = root.join("metrics");
        if !metrics.is_dir() {
            return Err(analysis_failed("no Java sources"));
        }

        std::fs::create_dir_all(output_dir)?;
        let tables = RawTables::in_dir(output_dir);
        for name in RawTables::FILE_NAMES {
            std::fs::copy(metrics.join(name), output_dir.join(name))?;
        }
        Ok(tables)
    }
}

struct UnavailableAnalyzer;

#[async_trait]
impl MetricsAnalyzer for UnavailableAnalyzer {
    async fn verify(&self) -> HarvestResult<()> {
        Err(HarvestError::Setup {
            message: "analyzer executable not found".to_string(),
            context: ErrorContext::new("unavailable_analyzer"),
        })
    }

    async fn invoke(&self, _source_tree: &Path, _output_dir: &Path) -> HarvestResult<RawTables> {
        unreachable!("invoke must not run when verify fails")
    }
}

/// Reports tables in the output directory without producing any
struct TablelessAnalyzer;

#[async_trait]
impl MetricsAnalyzer for TablelessAnalyzer {
    async fn invoke(&self, _source_tree: &Path, output_dir: &Path) -> HarvestResult<RawTables> {
        std::fs::create_dir_all(output_dir)?;
        Ok(RawTables::in_dir(output_dir))
    }
}

fn descriptor(name: &str, stars: u64) -> RepositoryDescriptor {
    RepositoryDescriptor {
        name: name.to_string(),
        owner: "acme".to_string(),
        url: format!("https://github.com/acme/{name}"),
        description: format!("{name} repository"),
        stars,
        age_days: 100,
        primary_language: "Java".to_string(),
        total_releases: 1,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn archive(root: &str, with_metrics: bool) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer
        .start_file(format!("{root}/src/A.java"), options)
        .unwrap();
    writer.write_all(b"class A {}").unwrap();

    if with_metrics {
        let tables = [
            ("class.csv", CLASS_TABLE),
            ("method.csv", "file,class,method\nA.java,A,run/0\n"),
            ("field.csv", "file,class,field\n"),
            ("variable.csv", "file,class,method,variable\n"),
        ];
        for (name, content) in tables {
            writer
                .start_file(format!("{root}/metrics/{name}"), options)
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
    }

    writer.finish().unwrap().into_inner()
}

async fn serve_main(server: &MockServer, name: &str, with_metrics: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/acme/{name}/archive/refs/heads/main.zip")))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(archive(&format!("{name}-main"), with_metrics)),
        )
        .mount(server)
        .await;
}

fn fetcher(server: &MockServer) -> Box<HttpArchiveFetcher> {
    let config = FetchConfig {
        archive_base_url: server.uri(),
        rate_limit_backoff_ms: 10,
        max_rate_limit_backoff_ms: 10,
        ..Default::default()
    };
    Box::new(HttpArchiveFetcher::new(config, None).unwrap())
}

fn dataset_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        RepositorySummary::HEADER.to_vec()
    );
    reader.records().map(|r| r.unwrap()).collect()
}

fn column(row: &csv::StringRecord, name: &str) -> String {
    let index = RepositorySummary::HEADER
        .iter()
        .position(|h| *h == name)
        .unwrap();
    row[index].to_string()
}

#[tokio::test]
async fn test_single_repository_end_to_end() {
    let server = MockServer::start().await;
    serve_main(&server, "demo", true).await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let orchestrator = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        &work_root,
    );

    let report = orchestrator.run(&[descriptor("demo", 1500)]).await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.failures.is_empty());

    let rows = dataset_rows(&dataset);
    assert_eq!(rows.len(), 1);
    assert_eq!(column(&rows[0], "name"), "demo");
    assert_eq!(column(&rows[0], "owner"), "acme");
    assert_eq!(column(&rows[0], "stars"), "1500");
    assert_eq!(column(&rows[0], "total_classes"), "2");
    assert_eq!(column(&rows[0], "total_methods"), "1");
    assert_eq!(column(&rows[0], "avg_cbo"), "5.0");
    assert_eq!(column(&rows[0], "avg_wmc"), "1.5");

    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failure_is_isolated_to_one_repository() {
    let server = MockServer::start().await;
    serve_main(&server, "first", true).await;
    serve_main(&server, "broken", false).await;
    serve_main(&server, "third", true).await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let orchestrator = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        &work_root,
    );

    let report = orchestrator
        .run(&[
            descriptor("first", 3),
            descriptor("broken", 2),
            descriptor("third", 1),
        ])
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.rows_written(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].repository, "acme/broken");
    assert_eq!(report.failures[0].stage, PipelineStage::Analyzing);

    let names: Vec<_> = dataset_rows(&dataset)
        .iter()
        .map(|r| column(r, "name"))
        .collect();
    assert_eq!(names, vec!["first", "third"]);

    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_archive_fails_at_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let orchestrator = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        &work_root,
    );

    let report = orchestrator.run(&[descriptor("gone", 1)]).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, PipelineStage::Fetching);
    assert!(!dataset.exists());
    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unavailable_analyzer_aborts_before_any_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");

    let orchestrator = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(UnavailableAnalyzer),
        DatasetWriter::new(&dataset),
        dir.path().join("work"),
    );

    let error = orchestrator
        .run(&[descriptor("demo", 1)])
        .await
        .unwrap_err();

    assert!(error.is_fatal());
    assert!(!dataset.exists());
}

#[tokio::test]
async fn test_limit_caps_processed_repositories() {
    let server = MockServer::start().await;
    serve_main(&server, "first", true).await;
    serve_main(&server, "second", true).await;
    Mock::given(method("GET"))
        .and(path("/acme/third/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");

    let orchestrator = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        dir.path().join("work"),
    )
    .with_limit(Some(2));

    let report = orchestrator
        .run(&[
            descriptor("first", 3),
            descriptor("second", 2),
            descriptor("third", 1),
        ])
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(dataset_rows(&dataset).len(), 2);
}

#[tokio::test]
async fn test_resume_skips_repositories_already_in_dataset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/acme/first/archive/refs/heads/main.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(archive("first-main", true)),
        )
        .expect(1)
        .mount(&server)
        .await;
    serve_main(&server, "second", true).await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let first_run = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        &work_root,
    )
    .with_resume(true);
    first_run.run(&[descriptor("first", 2)]).await.unwrap();

    let second_run = PipelineOrchestrator::new(
        fetcher(&server),
        Box::new(FixtureAnalyzer),
        DatasetWriter::new(&dataset),
        &work_root,
    )
    .with_resume(true);
    let report = second_run
        .run(&[descriptor("first", 2), descriptor("second", 1)])
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);

    let names: Vec<_> = dataset_rows(&dataset)
        .iter()
        .map(|r| column(r, "name"))
        .collect();
    assert_eq!(names, vec!["first", "second"]);
}

fn orchestrator(
    server: &MockServer,
    analyzer: Box<dyn MetricsAnalyzer>,
    dataset: &Path,
    work_root: &Path,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(fetcher(server), analyzer, DatasetWriter::new(dataset), work_root)
}

#[tokio::test]
async fn test_corrupt_archive_fails_at_extracting() {
    let server = MockServer::start().await;
    let mut body = b"PK".to_vec();
    body.extend(std::iter::repeat(0xA5u8).take(126));
    Mock::given(method("GET"))
        .and(path("/acme/corrupt/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let report = orchestrator(&server, Box::new(FixtureAnalyzer), &dataset, &work_root)
        .run(&[descriptor("corrupt", 1)])
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, PipelineStage::Extracting);
    assert!(!dataset.exists());
    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_tables_fail_at_aggregating() {
    let server = MockServer::start().await;
    serve_main(&server, "tableless", false).await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    let work_root = dir.path().join("work");

    let report = orchestrator(&server, Box::new(TablelessAnalyzer), &dataset, &work_root)
        .run(&[descriptor("tableless", 1)])
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, PipelineStage::Aggregating);
    assert!(!dataset.exists());
    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unwritable_dataset_fails_at_writing() {
    let server = MockServer::start().await;
    serve_main(&server, "demo", true).await;

    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.csv");
    std::fs::create_dir(&dataset).unwrap();
    let work_root = dir.path().join("work");

    let report = orchestrator(&server, Box::new(FixtureAnalyzer), &dataset, &work_root)
        .run(&[descriptor("demo", 1)])
        .await
        .unwrap();

    assert_eq!(report.rows_written(), 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, PipelineStage::Writing);
    assert!(dataset.is_dir());
    assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
}
