//! Kraken2 classification reports.
//!
//! A report is tab-separated, one row per taxon, with positional columns:
//! percentage of fragments covered, fragments covered, fragments assigned
//! directly to the taxon, rank code, NCBI taxon id and scientific name.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename suffix identifying a classification report.
pub const REPORT_SUFFIX: &str = "_report.txt";

/// Rank code for species-level rows.
pub const SPECIES_RANK: &str = "S";

/// Header names for the six positional report columns.
pub const REPORT_COLUMNS: [&str; 6] = [
    "Perc_frag_cover",
    "Nr_frag_cover",
    "Nr_frag_direct_at_taxon",
    "Rank_code",
    "NCBI_ID",
    "Scientific_name",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RowError {
    #[error("expected at least 6 tab-separated fields, found {0}")]
    TooFewFields(usize),

    #[error("direct fragment count '{0}' is not a non-negative integer")]
    InvalidCount(String),
}

/// One taxon row of a classification report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub perc_frag_cover: String,
    pub nr_frag_cover: String,
    pub nr_frag_direct_at_taxon: u64,
    pub rank_code: String,
    pub ncbi_id: String,
    pub scientific_name: String,
}

impl ReportRow {
    /// Parses one report line. Surrounding whitespace is trimmed from each
    /// field, which drops the indentation Kraken2 puts before names.
    pub fn parse(line: &str) -> Result<Self, RowError> {
        // Per-field trim, not just the line ends: names lose their indent.
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < REPORT_COLUMNS.len() {
            return Err(RowError::TooFewFields(fields.len()));
        }

        let nr_frag_direct_at_taxon = fields[2]
            .parse::<u64>()
            .map_err(|_| RowError::InvalidCount(fields[2].to_string()))?;

        Ok(ReportRow {
            perc_frag_cover: fields[0].to_string(),
            nr_frag_cover: fields[1].to_string(),
            nr_frag_direct_at_taxon,
            rank_code: fields[3].to_string(),
            ncbi_id: fields[4].to_string(),
            scientific_name: fields[5].to_string(),
        })
    }

    pub fn is_species(&self) -> bool {
        self.rank_code == SPECIES_RANK
    }

    /// Field values in `REPORT_COLUMNS` order.
    pub fn fields(&self) -> [String; 6] {
        [
            self.perc_frag_cover.clone(),
            self.nr_frag_cover.clone(),
            self.nr_frag_direct_at_taxon.to_string(),
            self.rank_code.clone(),
            self.ncbi_id.clone(),
            self.scientific_name.clone(),
        ]
    }
}

/// Recovers the sample id from a report filename by joining every
/// underscore-delimited segment except the last.
///
/// Returns `None` for names that are not reports. Ids that themselves end
/// in `_report` are not distinguishable from shorter ids.
pub fn sample_id_from_report_name(file_name: &str) -> Option<String> {
    if !file_name.ends_with(REPORT_SUFFIX) {
        return None;
    }
    let parts: Vec<&str> = file_name.split('_').collect();
    Some(parts[..parts.len() - 1].join("_"))
}

/// Where the report for `sample_id` lives inside `output_dir`.
pub fn report_path(output_dir: &Path, sample_id: &str) -> PathBuf {
    output_dir.join(format!("{}{}", sample_id, REPORT_SUFFIX))
}
