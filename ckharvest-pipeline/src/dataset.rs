//! CSV persistence: the analysis dataset, descriptor lists and dataset merging

use ckharvest_core::{
    persistence_error, HarvestResult, RepositoryDescriptor, RepositorySummary,
};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const URL_COLUMN: &str = "url";
const STARS_COLUMN: &str = "stars";

/// Appends summary rows to the dataset file, one call per repository
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    path: PathBuf,
}

impl DatasetWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is missing or empty.
    ///
    /// The file is reopened on every call so rows written before a crash
    /// are already on disk. An existing file whose first record is not the
    /// dataset header is left untouched and reported as an error.
    pub fn append(&self, summary: &RepositorySummary) -> HarvestResult<()> {
        let needs_header = match std::fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() > 0 => !self.has_dataset_header()?,
            _ => true,
        };

        ensure_parent(&self.path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                persistence_error!(
                    format!("Failed to open dataset {}: {}", self.path.display(), e),
                    "dataset_writer",
                    e
                )
            })?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer
                .write_record(RepositorySummary::HEADER)
                .map_err(|e| write_failed(&self.path, e))?;
        }
        writer
            .write_record(summary.to_record())
            .map_err(|e| write_failed(&self.path, e))?;
        writer.flush().map_err(|e| {
            persistence_error!(
                format!("Failed to flush dataset {}: {}", self.path.display(), e),
                "dataset_writer",
                e
            )
        })?;

        debug!(
            dataset = %self.path.display(),
            repository = %summary.descriptor.full_name(),
            header_written = needs_header,
            "Appended dataset row"
        );

        Ok(())
    }

    /// `Ok(false)` when the file holds no record yet
    fn has_dataset_header(&self) -> HarvestResult<bool> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| read_failed(&self.path, e))?;

        let first = match reader.records().next() {
            None => return Ok(false),
            Some(record) => record.map_err(|e| read_failed(&self.path, e))?,
        };

        if first
            .iter()
            .map(str::trim)
            .eq(RepositorySummary::HEADER.iter().copied())
        {
            Ok(true)
        } else {
            Err(persistence_error!(
                format!(
                    "{} is not a dataset file: its header does not match the dataset columns",
                    self.path.display()
                ),
                "dataset_writer"
            ))
        }
    }
}

/// URLs already present in a dataset; empty when the file does not exist
pub fn read_dataset_urls(path: &Path) -> HarvestResult<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }

    let table = read_table(path)?;
    if table.rows.is_empty() {
        return Ok(HashSet::new());
    }
    let url_index = table.column(URL_COLUMN)?;

    Ok(table
        .rows
        .iter()
        .filter_map(|row| row.get(url_index))
        .map(str::to_string)
        .collect())
}

/// Load descriptors saved by [`write_descriptors`]
pub fn read_descriptors(path: &Path) -> HarvestResult<Vec<RepositoryDescriptor>> {
    let mut reader = ReaderBuilder::new().from_path(path).map_err(|e| {
        persistence_error!(
            format!("Failed to open descriptor list {}: {}", path.display(), e),
            "descriptor_store",
            e
        )
    })?;

    let mut descriptors = Vec::new();
    for (index, row) in reader.deserialize::<RepositoryDescriptor>().enumerate() {
        let descriptor = row.map_err(|e| {
            persistence_error!(
                format!(
                    "Invalid descriptor on line {} of {}: {}",
                    index + 2,
                    path.display(),
                    e
                ),
                "descriptor_store",
                e
            )
        })?;
        descriptors.push(descriptor);
    }

    debug!(path = %path.display(), count = descriptors.len(), "Loaded descriptors");
    Ok(descriptors)
}

pub fn write_descriptors(path: &Path, descriptors: &[RepositoryDescriptor]) -> HarvestResult<()> {
    ensure_parent(path)?;

    let mut writer = WriterBuilder::new().from_path(path).map_err(|e| {
        persistence_error!(
            format!("Failed to create descriptor list {}: {}", path.display(), e),
            "descriptor_store",
            e
        )
    })?;

    if descriptors.is_empty() {
        writer
            .write_record(RepositoryDescriptor::HEADER)
            .map_err(|e| write_failed(path, e))?;
    }
    for descriptor in descriptors {
        writer
            .serialize(descriptor)
            .map_err(|e| write_failed(path, e))?;
    }
    writer.flush().map_err(|e| {
        persistence_error!(
            format!("Failed to flush {}: {}", path.display(), e),
            "descriptor_store",
            e
        )
    })?;

    Ok(())
}

/// Row counts from a merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub first_rows: usize,
    pub second_rows: usize,
    pub unique_rows: usize,
    pub duplicates_removed: usize,
}

/// Concatenate two datasets, keep the first row per URL and order by stars.
///
/// Both inputs must carry the same header. Rows whose stars cannot be
/// parsed sort after every parseable row.
pub fn merge_datasets(first: &Path, second: &Path, output: &Path) -> HarvestResult<MergeReport> {
    let first_table = read_table(first)?;
    let second_table = read_table(second)?;

    if first_table.headers != second_table.headers {
        return Err(persistence_error!(
            format!(
                "Cannot merge {} and {}: headers differ",
                first.display(),
                second.display()
            ),
            "dataset_merger"
        ));
    }

    let url_index = first_table.column(URL_COLUMN)?;
    let stars_index = first_table.column(STARS_COLUMN)?;

    let mut report = MergeReport {
        first_rows: first_table.rows.len(),
        second_rows: second_table.rows.len(),
        ..Default::default()
    };

    let mut seen = HashSet::new();
    let mut rows: Vec<StringRecord> = Vec::new();
    for row in first_table.rows.into_iter().chain(second_table.rows) {
        let url = row.get(url_index).unwrap_or_default().to_string();
        if seen.insert(url) {
            rows.push(row);
        } else {
            report.duplicates_removed += 1;
        }
    }

    rows.sort_by_key(|row| {
        Reverse(
            row.get(stars_index)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(|v| v as u64),
        )
    });
    report.unique_rows = rows.len();

    ensure_parent(output)?;
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .from_path(output)
        .map_err(|e| write_failed(output, e))?;
    writer
        .write_record(&first_table.headers)
        .map_err(|e| write_failed(output, e))?;
    for row in &rows {
        writer.write_record(row).map_err(|e| write_failed(output, e))?;
    }
    writer.flush().map_err(|e| {
        persistence_error!(
            format!("Failed to flush {}: {}", output.display(), e),
            "dataset_merger",
            e
        )
    })?;

    info!(
        output = %output.display(),
        unique_rows = report.unique_rows,
        duplicates_removed = report.duplicates_removed,
        "Merged datasets"
    );

    Ok(report)
}

pub(crate) struct Table {
    pub(crate) headers: StringRecord,
    pub(crate) rows: Vec<StringRecord>,
}

impl Table {
    pub(crate) fn column(&self, name: &str) -> HarvestResult<usize> {
        self.headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                persistence_error!(
                    format!("Dataset has no '{}' column", name),
                    "dataset_reader"
                )
            })
    }
}

pub(crate) fn read_table(path: &Path) -> HarvestResult<Table> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            persistence_error!(
                format!("Failed to open dataset {}: {}", path.display(), e),
                "dataset_reader",
                e
            )
        })?;

    let headers = reader.headers().cloned().map_err(|e| read_failed(path, e))?;
    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| read_failed(path, e))?;

    Ok(Table { headers, rows })
}

fn ensure_parent(path: &Path) -> HarvestResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                persistence_error!(
                    format!("Failed to create directory {}: {}", parent.display(), e),
                    "dataset_writer",
                    e
                )
            })?;
        }
    }
    Ok(())
}

fn write_failed(path: &Path, error: csv::Error) -> ckharvest_core::HarvestError {
    persistence_error!(
        format!("Failed to write {}: {}", path.display(), error),
        "dataset_writer",
        error
    )
}

fn read_failed(path: &Path, error: csv::Error) -> ckharvest_core::HarvestError {
    persistence_error!(
        format!("Failed to read {}: {}", path.display(), error),
        "dataset_reader",
        error
    )
}
