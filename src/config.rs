//! Configuration for the external tools.
//!
//! Every field has a default, so a JSON tool configuration only needs to
//! name what it changes, e.g. `{"kraken2": {"confidence": 0.1}}`.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading tool configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tool configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trimmomatic settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimmomaticConfig {
    pub executable: String,
    /// Trimming steps appended after the output files, in order.
    pub steps: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for TrimmomaticConfig {
    fn default() -> Self {
        TrimmomaticConfig {
            executable: "trimmomatic".to_string(),
            steps: vec![
                "LEADING:3".to_string(),
                "TRAILING:3".to_string(),
                "SLIDINGWINDOW:4:15".to_string(),
                "MINLEN:36".to_string(),
            ],
            extra_args: Vec::new(),
        }
    }
}

/// Bowtie2 settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bowtie2Config {
    pub executable: String,
    pub extra_args: Vec<String>,
}

impl Default for Bowtie2Config {
    fn default() -> Self {
        Bowtie2Config {
            executable: "bowtie2".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Kraken2 settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Kraken2Config {
    pub executable: String,
    /// Passed as `--confidence` when set.
    pub confidence: Option<f64>,
    pub extra_args: Vec<String>,
}

impl Default for Kraken2Config {
    fn default() -> Self {
        Kraken2Config {
            executable: "kraken2".to_string(),
            confidence: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub trimmomatic: TrimmomaticConfig,
    pub bowtie2: Bowtie2Config,
    pub kraken2: Kraken2Config,
}

impl ToolConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
