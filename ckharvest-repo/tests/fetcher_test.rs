//! Archive download tests against a mock hosting platform

use ckharvest_core::{ArchiveFetcher, DownloadFailure, FetchConfig, HarvestError, RepositoryDescriptor};
use ckharvest_repo::{ArchiveExtractor, HttpArchiveFetcher, Workspace};
use std::io::{Cursor, Write};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

fn descriptor() -> RepositoryDescriptor {
    RepositoryDescriptor {
        name: "demo".to_string(),
        owner: "acme".to_string(),
        url: "https://github.com/acme/demo".to_string(),
        description: "demo repository".to_string(),
        stars: 1500,
        age_days: 365,
        primary_language: "Java".to_string(),
        total_releases: 2,
        created_at: "2022-01-01T00:00:00Z".to_string(),
    }
}

fn zip_bytes(root: &str, body: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(format!("{root}/src/App.java"), SimpleFileOptions::default())
        .unwrap();
    writer.write_all(body.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

fn fetcher(server: &MockServer) -> HttpArchiveFetcher {
    let config = FetchConfig {
        archive_base_url: server.uri(),
        rate_limit_backoff_ms: 10,
        max_rate_limit_backoff_ms: 50,
        timeout_seconds: 5,
        ..Default::default()
    };
    HttpArchiveFetcher::new(config, None).unwrap()
}

#[tokio::test]
async fn test_falls_back_to_secondary_branch() {
    let server = MockServer::start().await;
    let master_archive = zip_bytes("demo-master", "class App { /* master */ }");

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/master.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(master_archive.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let work_root = tempfile::tempdir().unwrap();
    let workspace = Workspace::create(work_root.path(), &descriptor()).unwrap();

    let archive = fetcher(&server)
        .fetch(&descriptor(), &workspace.archive_path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&archive).unwrap(), master_archive);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let source = ArchiveExtractor::new()
        .extract(&archive, &workspace.source_dir())
        .unwrap();
    assert!(source.join("demo-master/src/App.java").is_file());
}

#[tokio::test]
async fn test_primary_branch_is_used_first() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes("demo-main", "class App {}")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/master.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.zip");
    fetcher(&server).fetch(&descriptor(), &destination).await.unwrap();

    assert!(destination.is_file());
}

#[tokio::test]
async fn test_both_branches_failing_leaves_no_archive() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let work_root = tempfile::tempdir().unwrap();
    let workspace = Workspace::create(work_root.path(), &descriptor()).unwrap();

    let result = fetcher(&server)
        .fetch(&descriptor(), &workspace.archive_path())
        .await;

    match result {
        Err(HarvestError::Download { reason, .. }) => assert_eq!(reason, DownloadFailure::NotFound),
        other => panic!("Expected Download error, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(workspace.root()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_small_or_non_zip_bodies_are_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/master.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>".repeat(64)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.zip");
    let error = fetcher(&server)
        .fetch(&descriptor(), &destination)
        .await
        .unwrap_err();

    assert_eq!(error.download_failure(), Some(DownloadFailure::NotAnArchive));
    assert!(error.to_string().contains("main"));
    assert!(!destination.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unwritable_destination_stops_without_trying_other_branches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes("demo-main", "class App {}")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/master.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("missing").join("archive.zip");
    let error = fetcher(&server)
        .fetch(&descriptor(), &destination)
        .await
        .unwrap_err();

    assert_eq!(error.download_failure(), Some(DownloadFailure::Transport));
    assert!(error.to_string().contains("Failed to write archive"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rate_limit_is_a_distinct_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/master.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.zip");
    let error = fetcher(&server)
        .fetch(&descriptor(), &destination)
        .await
        .unwrap_err();

    assert_eq!(error.download_failure(), Some(DownloadFailure::RateLimited));
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_rate_limit_recovers_after_backoff() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(
            ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/demo/archive/refs/heads/main.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes("demo-main", "class App {}")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("archive.zip");
    fetcher(&server).fetch(&descriptor(), &destination).await.unwrap();

    assert!(destination.is_file());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_token_is_sent_as_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes("demo-main", "class App {}")))
        .expect(1)
        .mount(&server)
        .await;

    let config = FetchConfig {
        archive_base_url: server.uri(),
        ..Default::default()
    };
    let fetcher = HttpArchiveFetcher::new(config, Some("secret".to_string())).unwrap();

    let dir = tempfile::tempdir().unwrap();
    fetcher
        .fetch(&descriptor(), &dir.path().join("archive.zip"))
        .await
        .unwrap();
}
