//! Metadata handling module.
//!
//! A metadata table is row-per-sample. The first column always holds the
//! sample identifier; every other column is an arbitrary attribute that is
//! carried through verbatim into the merged abundance table.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Column name used when metadata is synthesised from sample ids alone.
pub const SAMPLE_IDS_COLUMN: &str = "Sample_IDs";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Metadata table has no columns")]
    NoColumns,

    #[error("Metadata column '{0}' appears more than once")]
    DuplicateColumn(String),

    #[error("Metadata row {row} has {found} fields, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Represents the metadata for a collection of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Sample id -> index of the first row carrying it
    index: HashMap<String, usize>,
}

impl Metadata {
    /// Builds a table from column names and rows. The first column is the
    /// sample identifier.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, MetadataError> {
        if columns.is_empty() {
            return Err(MetadataError::NoColumns);
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(MetadataError::DuplicateColumn(column.clone()));
            }
        }

        let mut index = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(MetadataError::RowWidth {
                    row: i + 1,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
            // Duplicate ids resolve to the first row, like a `.loc[...].iloc[0]` lookup.
            index.entry(row[0].clone()).or_insert(i);
        }

        Ok(Metadata {
            columns,
            rows,
            index,
        })
    }

    /// Builds a single-column table (`Sample_IDs`) from bare sample ids.
    pub fn from_sample_ids<I, S>(sample_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows: Vec<Vec<String>> = sample_ids.into_iter().map(|s| vec![s.into()]).collect();
        let mut index = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            index.entry(row[0].clone()).or_insert(i);
        }
        Metadata {
            columns: vec![SAMPLE_IDS_COLUMN.to_string()],
            rows,
            index,
        }
    }

    /// Name of the identifier column.
    pub fn id_column(&self) -> &str {
        &self.columns[0]
    }

    /// Every column except the identifier, in original order.
    pub fn attribute_columns(&self) -> &[String] {
        &self.columns[1..]
    }

    pub fn contains(&self, sample_id: &str) -> bool {
        self.index.contains_key(sample_id)
    }

    /// Attributes of the first row whose identifier equals `sample_id`.
    pub fn attributes(&self, sample_id: &str) -> Option<IndexMap<String, String>> {
        let row = &self.rows[*self.index.get(sample_id)?];
        Some(
            self.attribute_columns()
                .iter()
                .cloned()
                .zip(row[1..].iter().cloned())
                .collect(),
        )
    }

    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }
}

/// Loads metadata from a comma-delimited file with a header row.
///
/// # Arguments
///
/// * `path` - Path to the metadata CSV file
///
/// # Returns
///
/// * `Result<Metadata, MetadataError>` - Metadata structure or error
pub fn load_metadata(path: &Path) -> Result<Metadata, MetadataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.first().map_or(true, |id| id.is_empty()) {
            log::warn!("Skipping metadata row with empty sample ID.");
            continue;
        }
        rows.push(row);
    }

    if rows.is_empty() {
        log::warn!("Metadata file '{}' contains no samples.", path.display());
    }
    log::debug!(
        "Loaded {} metadata rows with columns {:?} from {}",
        rows.len(),
        columns,
        path.display()
    );

    Metadata::new(columns, rows)
}
