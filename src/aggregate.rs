//! Merges per-sample Kraken2 reports into one species abundance table.
//!
//! Every `*_report.txt` in a directory is scanned once. Species rows whose
//! direct fragment count passes the filter, and whose sample appears in the
//! metadata, become one merged record each, joined with that sample's
//! metadata attributes.

use crate::io::{stage_single_column_csv, stage_tsv};
use crate::kraken_report::{sample_id_from_report_name, ReportRow, RowError, REPORT_COLUMNS};
use crate::metadata::{load_metadata, Metadata, MetadataError, SAMPLE_IDS_COLUMN};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the merged species table.
pub const MERGED_TABLE_NAME: &str = "merged_kraken1.tsv";

/// File name of the list of sample ids seen while scanning.
pub const SAMPLE_IDS_NAME: &str = "sample_ids.csv";

/// Column holding the sample id in the merged table.
pub const SAMPLE_ID_COLUMN: &str = "SampleID";

// --- Error Type ---
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("No metadata provided: no metadata file exists and no sample table was given")]
    MissingMetadata,

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed report {path} line {line}: {reason}")]
    MalformedReport {
        path: PathBuf,
        line: usize,
        reason: RowError,
    },

    #[error("Failed to move output into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Where the sample metadata comes from. A file that exists wins over an
/// in-memory table.
#[derive(Debug, Clone, Default)]
pub struct MetadataSource {
    pub file: Option<PathBuf>,
    pub table: Option<Metadata>,
}

impl MetadataSource {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        MetadataSource {
            file: Some(path.into()),
            table: None,
        }
    }

    pub fn from_table(table: Metadata) -> Self {
        MetadataSource {
            file: None,
            table: Some(table),
        }
    }

    pub fn resolve(self) -> Result<Metadata, AggregationError> {
        match (self.file, self.table) {
            (Some(path), _) if path.exists() => {
                info!("Loading metadata from {}", path.display());
                Ok(load_metadata(&path)?)
            }
            (file, Some(table)) => {
                if let Some(path) = file {
                    warn!(
                        "Metadata file {} not found; using the in-memory sample table.",
                        path.display()
                    );
                }
                Ok(table)
            }
            _ => Err(AggregationError::MissingMetadata),
        }
    }
}

/// Bounds on the direct fragment count of a species row. Both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCountFilter {
    pub min_direct: u64,
    pub max_direct: Option<u64>,
}

impl Default for ReadCountFilter {
    fn default() -> Self {
        ReadCountFilter {
            min_direct: 0,
            max_direct: None,
        }
    }
}

impl ReadCountFilter {
    pub fn new(min_direct: u64, max_direct: Option<u64>) -> Self {
        ReadCountFilter {
            min_direct,
            max_direct,
        }
    }

    pub fn accepts(&self, direct: u64) -> bool {
        direct >= self.min_direct && self.max_direct.map_or(true, |max| direct <= max)
    }
}

/// Identity of a merged record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub sample_id: String,
    pub taxon_id: String,
}

/// One species row joined with its sample's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub sample_id: String,
    pub row: ReportRow,
    pub attributes: IndexMap<String, String>,
}

impl AggregatedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            sample_id: self.sample_id.clone(),
            taxon_id: self.row.ncbi_id.clone(),
        }
    }

    /// Values in merged-table column order.
    fn to_fields(&self, attribute_columns: &[String]) -> Vec<String> {
        let mut fields = Vec::with_capacity(REPORT_COLUMNS.len() + 1 + attribute_columns.len());
        fields.extend(self.row.fields());
        fields.push(self.sample_id.clone());
        for column in attribute_columns {
            fields.push(self.attributes.get(column).cloned().unwrap_or_default());
        }
        fields
    }
}

/// Output of a successful aggregation.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub merged_table: PathBuf,
    pub sample_ids: PathBuf,
    pub records: usize,
    pub reports_scanned: usize,
    pub sample_id_entries: usize,
}

/// Merged-table header: report columns, `SampleID`, then metadata
/// attribute columns in their original order.
pub fn merged_header(metadata: &Metadata) -> Vec<String> {
    REPORT_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(std::iter::once(SAMPLE_ID_COLUMN.to_string()))
        .chain(metadata.attribute_columns().iter().cloned())
        .collect()
}

/// Aggregates the reports in one directory.
pub struct ReportAggregator {
    report_dir: PathBuf,
    filter: ReadCountFilter,
}

impl ReportAggregator {
    pub fn new(report_dir: impl Into<PathBuf>, filter: ReadCountFilter) -> Self {
        ReportAggregator {
            report_dir: report_dir.into(),
            filter,
        }
    }

    pub fn merged_table_path(&self) -> PathBuf {
        self.report_dir.join(MERGED_TABLE_NAME)
    }

    pub fn sample_ids_path(&self) -> PathBuf {
        self.report_dir.join(SAMPLE_IDS_NAME)
    }

    /// Scans every report, writes the merged table and the sample id list,
    /// and returns their paths.
    ///
    /// Nothing is written unless the whole scan succeeds. The sample id list
    /// is renamed into place before the merged table, so a failed final
    /// rename can leave a new id list next to the previous merged table.
    pub fn aggregate(&self, source: MetadataSource) -> Result<Aggregation, AggregationError> {
        let metadata = source.resolve()?;
        info!(
            "Aggregating reports in {} against {} metadata samples (id column '{}')",
            self.report_dir.display(),
            metadata.sample_count(),
            metadata.id_column()
        );

        let mut records: IndexMap<RecordKey, AggregatedRecord> = IndexMap::new();
        let mut sample_ids: Vec<String> = Vec::new();

        let reports = self.report_files()?;
        for (sample_id, path) in &reports {
            self.scan_report(path, sample_id, &metadata, &mut records, &mut sample_ids)?;
        }

        let header = merged_header(&metadata);
        let attribute_columns = metadata.attribute_columns();
        let merged = stage_tsv(
            &self.merged_table_path(),
            &header,
            records.values().map(|r| r.to_fields(attribute_columns)),
        )?;
        let ids = stage_single_column_csv(&self.sample_ids_path(), SAMPLE_IDS_COLUMN, &sample_ids)?;

        let sample_ids_path = ids.commit()?;
        let merged_table = merged.commit()?;
        info!(
            "Wrote {} species records from {} reports to {}",
            records.len(),
            reports.len(),
            merged_table.display()
        );

        Ok(Aggregation {
            merged_table,
            sample_ids: sample_ids_path,
            records: records.len(),
            reports_scanned: reports.len(),
            sample_id_entries: sample_ids.len(),
        })
    }

    /// Sample ids of the reports in the directory, in scan order.
    pub fn report_sample_ids(&self) -> Result<Vec<String>, AggregationError> {
        Ok(self
            .report_files()?
            .into_iter()
            .map(|(sample_id, _)| sample_id)
            .collect())
    }

    /// Report files with their derived sample ids, sorted by file name.
    fn report_files(&self) -> Result<Vec<(String, PathBuf)>, AggregationError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.report_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            if let Some(sample_id) = sample_id_from_report_name(&name) {
                reports.push((name, sample_id, entry.path()));
            }
        }
        reports.sort();
        Ok(reports
            .into_iter()
            .map(|(_, sample_id, path)| (sample_id, path))
            .collect())
    }

    fn scan_report(
        &self,
        path: &Path,
        sample_id: &str,
        metadata: &Metadata,
        records: &mut IndexMap<RecordKey, AggregatedRecord>,
        sample_ids: &mut Vec<String>,
    ) -> Result<(), AggregationError> {
        if !metadata.contains(sample_id) {
            warn!(
                "Sample '{}' ({}) is not in the metadata; its rows are excluded.",
                sample_id,
                path.display()
            );
        }

        let attributes = metadata.attributes(sample_id);
        let reader = BufReader::new(File::open(path)?);
        let mut kept = 0usize;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row = ReportRow::parse(&line).map_err(|reason| AggregationError::MalformedReport {
                path: path.to_path_buf(),
                line: i + 1,
                reason,
            })?;
            sample_ids.push(sample_id.to_string());

            if !row.is_species() || !self.filter.accepts(row.nr_frag_direct_at_taxon) {
                continue;
            }
            if let Some(attributes) = &attributes {
                let record = AggregatedRecord {
                    sample_id: sample_id.to_string(),
                    row,
                    attributes: attributes.clone(),
                };
                records.insert(record.key(), record);
                kept += 1;
            }
        }

        debug!(
            "{}: kept {} species rows for sample '{}'",
            path.display(),
            kept,
            sample_id
        );
        Ok(())
    }
}
