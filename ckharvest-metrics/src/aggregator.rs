//! Reduction of the analyzer's raw tables into one summary per repository

use ckharvest_core::{aggregation_error, HarvestResult, MetricSummary, RawTables};
use csv::{ByteRecord, ReaderBuilder};
use std::path::Path;
use tracing::{debug, warn};

/// Class-table columns averaged into the summary, in summary order
pub const CLASS_METRICS: [&str; 8] = ["wmc", "cbo", "lcom", "dit", "noc", "rfc", "loc", "cc"];

/// Row count and per-column sums of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub rows: u64,
    pub sums: Vec<f64>,
    /// Records the CSV reader could not make sense of; not counted as rows
    pub malformed: u64,
}

impl TableScan {
    /// Mean of column `index`; zero for an empty table
    pub fn mean(&self, index: usize) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        self.sums.get(index).copied().unwrap_or(0.0) / self.rows as f64
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricAggregator;

impl MetricAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, tables: &RawTables) -> HarvestResult<MetricSummary> {
        let class = scan_table(&tables.class, &CLASS_METRICS)?;
        let method = scan_table(&tables.method, &[])?;
        let field = scan_table(&tables.field, &[])?;
        let variable = scan_table(&tables.variable, &[])?;

        let summary = MetricSummary {
            total_classes: class.rows,
            total_methods: method.rows,
            total_fields: field.rows,
            total_variables: variable.rows,
            avg_wmc: class.mean(0),
            avg_cbo: class.mean(1),
            avg_lcom: class.mean(2),
            avg_dit: class.mean(3),
            avg_noc: class.mean(4),
            avg_rfc: class.mean(5),
            avg_loc: class.mean(6),
            avg_cc: class.mean(7),
        };

        debug!(
            classes = summary.total_classes,
            methods = summary.total_methods,
            fields = summary.total_fields,
            variables = summary.total_variables,
            "Aggregated raw tables"
        );

        Ok(summary)
    }
}

/// Count the rows of a CSV table and sum the named columns.
///
/// Column names match headers case-insensitively. A cell that is missing,
/// non-numeric or not finite contributes zero while its row still counts.
/// Only I/O failures, or a table whose every record is malformed, are errors.
pub fn scan_table(path: &Path, columns: &[&str]) -> HarvestResult<TableScan> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)
        .map_err(|e| {
            aggregation_error!(
                format!("Failed to open table {}: {}", path.display(), e),
                "metric_aggregator",
                e
            )
        })?;

    let headers = reader.byte_headers().cloned().map_err(|e| {
        aggregation_error!(
            format!("Failed to read header of {}: {}", path.display(), e),
            "metric_aggregator",
            e
        )
    })?;

    let indices: Vec<Option<usize>> = columns
        .iter()
        .map(|column| column_index(&headers, column))
        .collect();

    for (column, index) in columns.iter().zip(&indices) {
        if index.is_none() && !headers.is_empty() {
            debug!(table = %path.display(), column, "Column absent, averaging as zero");
        }
    }

    let mut scan = TableScan {
        rows: 0,
        sums: vec![0.0; columns.len()],
        malformed: 0,
    };

    let mut record = ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {
                scan.rows += 1;
                for (sum, index) in scan.sums.iter_mut().zip(&indices) {
                    *sum += index.and_then(|i| record.get(i)).map(numeric).unwrap_or(0.0);
                }
            }
            Ok(false) => break,
            Err(e) if e.is_io_error() => {
                return Err(aggregation_error!(
                    format!("Failed to read {}: {}", path.display(), e),
                    "metric_aggregator",
                    e
                ));
            }
            Err(e) => {
                scan.malformed += 1;
                warn!(table = %path.display(), error = %e, "Skipping malformed record");
            }
        }
    }

    if scan.rows == 0 && scan.malformed > 0 {
        return Err(aggregation_error!(
            format!(
                "No readable rows in {} ({} malformed)",
                path.display(),
                scan.malformed
            ),
            "metric_aggregator"
        ));
    }

    Ok(scan)
}

fn column_index(headers: &ByteRecord, column: &str) -> Option<usize> {
    headers.iter().position(|header| {
        std::str::from_utf8(header)
            .map(|h| h.trim().eq_ignore_ascii_case(column))
            .unwrap_or(false)
    })
}

fn numeric(cell: &[u8]) -> f64 {
    std::str::from_utf8(cell)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
