//! Analyzer subprocess tests driven by small shell scripts
#![cfg(unix)]

use ckharvest_core::{AnalyzerConfig, HarvestError, MetricsAnalyzer};
use ckharvest_metrics::{CkAnalyzer, MetricAggregator};
use std::fs;

/// Analyzer that runs `script` with the source tree as `$1` and the output dir as `$2`
fn scripted(script: &str) -> CkAnalyzer {
    CkAnalyzer::new(AnalyzerConfig {
        program: "sh".to_string(),
        jar_path: None,
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            "{source}".to_string(),
            "{output}".to_string(),
        ],
    })
}

const WRITE_ALL_TABLES: &str = r#"
printf 'file,class,type,cbo,wmc\n%s/A.java,A,class,4,1\n%s/B.java,B,class,6,3\n' "$1" "$1" > "$2/class.csv"
printf 'file,class,method\nA.java,A,run/0\n' > "$2/method.csv"
printf 'file,class,field\n' > "$2/field.csv"
printf 'file,class,method,variable\nA.java,A,run/0,i\nA.java,A,run/0,j\n' > "$2/variable.csv"
"#;

#[tokio::test]
async fn test_successful_run_produces_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let output = dir.path().join("ck_output");
    fs::create_dir_all(&source).unwrap();

    let analyzer = scripted(WRITE_ALL_TABLES);
    analyzer.verify().await.unwrap();
    let tables = analyzer.invoke(&source, &output).await.unwrap();

    assert!(tables.missing().is_empty());

    let summary = MetricAggregator::new().aggregate(&tables).unwrap();
    assert_eq!(summary.total_classes, 2);
    assert_eq!(summary.total_methods, 1);
    assert_eq!(summary.total_fields, 0);
    assert_eq!(summary.total_variables, 2);
    assert_eq!(summary.avg_cbo, 5.0);
    assert_eq!(summary.avg_wmc, 2.0);
}

#[tokio::test]
async fn test_non_zero_exit_is_an_analysis_error() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = scripted("echo 'java.lang.OutOfMemoryError' >&2; exit 3");

    let error = analyzer
        .invoke(dir.path(), &dir.path().join("out"))
        .await
        .unwrap_err();

    match error {
        HarvestError::Analysis {
            message, exit_code, ..
        } => {
            assert_eq!(exit_code, Some(3));
            assert!(message.contains("OutOfMemoryError"));
        }
        other => panic!("Expected Analysis error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_table_after_clean_exit_is_an_analysis_error() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = scripted(
        r#"for t in class method field; do echo header > "$2/$t.csv"; done"#,
    );

    let error = analyzer
        .invoke(dir.path(), &dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(error, HarvestError::Analysis { .. }));
    assert!(error.to_string().contains("variable.csv"));
}
