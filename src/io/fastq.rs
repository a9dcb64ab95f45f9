//! Functions specifically for paired FASTQ inputs.
//!
//! Finds forward/reverse read pairs in an input directory, derives sample
//! names from the forward filename, and counts records with `needletail`
//! (compressed files are handled automatically).

use log::{debug, info, warn};
use needletail::errors::{ParseError, ParseErrorKind};
use needletail::parse_fastx_file;
use std::fs;
use std::path::{Path, PathBuf};

/// Forward-read filename fragments removed, in order, to get a sample name.
const FORWARD_SUFFIXES: [&str; 8] = [
    "_R1_001.fastq.gz",
    "_R1_001.fastq",
    "_R1.fastq.gz",
    "_R1.fastq",
    "R1.fastq.gz",
    "R1.fastq",
    "_R1_001",
    "_R1",
];

/// Reverse-read filename suffixes tried, in order, after the sample name.
const REVERSE_SUFFIXES: [&str; 8] = [
    "_R2_001.fastq.gz",
    "_R2_001.fastq",
    "_R2.fastq.gz",
    "_R2.fastq",
    "R2_001.fastq.gz",
    "R2_001.fastq",
    "R2.fastq.gz",
    "R2.fastq",
];

/// A pair of read files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPair {
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

impl ReadPair {
    pub fn new(forward: impl Into<PathBuf>, reverse: impl Into<PathBuf>) -> Self {
        ReadPair {
            forward: forward.into(),
            reverse: reverse.into(),
        }
    }

    pub fn is_gzipped(&self) -> bool {
        has_gz_extension(&self.forward) && has_gz_extension(&self.reverse)
    }
}

fn has_gz_extension(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// One sample discovered in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub sample_id: String,
    pub reads: ReadPair,
}

/// Whether `file_name` looks like a forward read file (`*_R1*.fastq*`).
fn is_forward_name(file_name: &str) -> bool {
    file_name
        .find("_R1")
        .map_or(false, |pos| file_name[pos + 3..].contains(".fastq"))
}

/// Derives a sample name from a forward read filename.
pub fn sample_name_from_forward(file_name: &str) -> String {
    FORWARD_SUFFIXES
        .iter()
        .fold(file_name.to_string(), |name, suffix| name.replace(suffix, ""))
}

/// Finds the reverse read file for `sample_name` in `dir`, if any.
pub fn find_reverse(dir: &Path, sample_name: &str) -> Option<PathBuf> {
    REVERSE_SUFFIXES
        .iter()
        .map(|suffix| dir.join(format!("{}{}", sample_name, suffix)))
        .find(|candidate| candidate.is_file())
}

/// Scans `input_dir` for paired samples, sorted by forward filename.
///
/// Forward files without a matching reverse file are logged and skipped.
pub fn discover_samples(input_dir: &Path) -> std::io::Result<Vec<Sample>> {
    let forward_files = forward_files(input_dir)?;
    let mut samples = Vec::with_capacity(forward_files.len());
    for (name, forward) in forward_files {
        let sample_id = sample_name_from_forward(&name);
        match find_reverse(input_dir, &sample_id) {
            Some(reverse) => {
                debug!(
                    "Paired {} with {} as sample {}",
                    forward.display(),
                    reverse.display(),
                    sample_id
                );
                samples.push(Sample {
                    sample_id,
                    reads: ReadPair { forward, reverse },
                });
            }
            None => warn!("No matching R2 file found for {}. Skipping.", sample_id),
        }
    }

    info!(
        "Found {} paired samples in {}",
        samples.len(),
        input_dir.display()
    );
    Ok(samples)
}

/// Sample names of every forward read file in `input_dir`, including
/// those without a reverse file.
pub fn forward_sample_ids(input_dir: &Path) -> std::io::Result<Vec<String>> {
    Ok(forward_files(input_dir)?
        .iter()
        .map(|(name, _)| sample_name_from_forward(name))
        .collect())
}

/// Forward read files sorted by file name.
fn forward_files(input_dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files: Vec<(String, PathBuf)> = fs::read_dir(input_dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            is_forward_name(&name).then(|| (name, entry.path()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Counts the records in a FASTA/FASTQ file. An empty file has zero.
pub fn count_records(path: &Path) -> Result<u64, ParseError> {
    let mut reader = match parse_fastx_file(path) {
        Ok(reader) => reader,
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut count = 0;
    while let Some(record) = reader.next() {
        record?;
        count += 1;
    }
    Ok(count)
}
