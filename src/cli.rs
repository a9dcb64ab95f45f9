use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::fs;
use std::path::PathBuf;

use crate::aggregate::{MetadataSource, ReadCountFilter, ReportAggregator};
use crate::config::ToolConfig;
use crate::io::fastq::{discover_samples, forward_sample_ids};
use crate::metadata::Metadata;
use crate::pipeline::{generate_report, ProcessorConfig, RunSummary, SampleProcessor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log debug messages, including the exact tool command lines
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trim, optionally remove host reads, classify every sample, then merge the reports
    Run(RunArgs),

    /// Merge existing Kraken2 reports in a directory with sample metadata
    Aggregate(AggregateArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the Kraken2 database directory
    #[arg(long)]
    pub kraken_db: PathBuf,

    /// Path (prefix) of the Bowtie2 host index; host depletion is skipped without it
    #[arg(long)]
    pub host_index: Option<PathBuf>,

    /// Directory that receives intermediate reads, reports and merged tables
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Directory containing paired FASTQ files (*_R1*.fastq* / *_R2*.fastq*)
    #[arg(short, long)]
    pub input_dir: PathBuf,

    /// Number of threads passed to each tool
    #[arg(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Metadata CSV; the first column holds sample ids
    #[arg(long, required_unless_present = "no_metadata")]
    pub metadata_file: Option<PathBuf>,

    /// Use the discovered sample ids as the only metadata
    #[arg(long, conflicts_with = "metadata_file")]
    pub no_metadata: bool,

    /// Minimum number of reads assigned directly to a species
    #[arg(long, default_value_t = 1)]
    pub read_count: u64,

    /// Maximum number of reads assigned directly to a species
    #[arg(long)]
    pub max_read_count: Option<u64>,

    /// Skip Bowtie2 host depletion even if a host index is given
    #[arg(long)]
    pub no_host_depletion: bool,

    /// Use <output_dir>/<sample>_report.txt instead of running the tools
    #[arg(long)]
    pub use_precomputed_reports: bool,

    /// Count read pairs after each step
    #[arg(long)]
    pub count_reads: bool,

    /// JSON file overriding tool executables and arguments
    #[arg(long)]
    pub tool_config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Directory containing <sample>_report.txt files
    #[arg(short, long)]
    pub report_dir: PathBuf,

    /// Metadata CSV; the first column holds sample ids
    #[arg(long, required_unless_present = "no_metadata")]
    pub metadata_file: Option<PathBuf>,

    /// Use the sample ids of the reports as the only metadata
    #[arg(long, conflicts_with = "metadata_file")]
    pub no_metadata: bool,

    /// Minimum number of reads assigned directly to a species
    #[arg(long, default_value_t = 1)]
    pub read_count: u64,

    /// Maximum number of reads assigned directly to a species
    #[arg(long)]
    pub max_read_count: Option<u64>,
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Aggregate(args) => run_aggregate(args),
    }
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    // Fail before any sample is processed, not after.
    if !args.use_precomputed_reports && !args.kraken_db.is_dir() {
        bail!(
            "Kraken database directory '{}' not found.",
            args.kraken_db.display()
        );
    }
    if let Some(path) = &args.metadata_file {
        if !path.is_file() {
            bail!("Metadata file '{}' not found.", path.display());
        }
    }

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    let tools = match &args.tool_config {
        Some(path) => ToolConfig::from_json_file(path)
            .with_context(|| format!("Failed to load tool configuration {}", path.display()))?,
        None => ToolConfig::default(),
    };

    let run_host_depletion = !args.no_host_depletion && args.host_index.is_some();
    if !run_host_depletion && !args.use_precomputed_reports {
        info!("Host depletion disabled.");
    }

    let processor = SampleProcessor::with_external_tools(
        ProcessorConfig {
            kraken_db: args.kraken_db.clone(),
            host_index: args.host_index.clone(),
            output_dir: args.output_dir.clone(),
            threads: args.threads,
            run_host_depletion,
            use_precomputed: args.use_precomputed_reports,
            count_reads: args.count_reads,
        },
        &tools,
    );

    let samples = discover_samples(&args.input_dir)
        .with_context(|| format!("Failed to scan input directory {}", args.input_dir.display()))?;
    if samples.is_empty() {
        warn!("No paired FASTQ files found in {}", args.input_dir.display());
    }

    let mut summary = RunSummary {
        samples_found: samples.len(),
        ..RunSummary::default()
    };
    for sample in &samples {
        info!("Processing sample {} with paired files.", sample.sample_id);
        summary.record(&sample.sample_id, processor.process_or_skip(sample));
    }

    let source = match &args.metadata_file {
        Some(path) if !args.no_metadata => MetadataSource::from_file(path),
        _ => {
            // Every forward file counts, paired or not.
            let ids = forward_sample_ids(&args.input_dir).with_context(|| {
                format!("Failed to scan input directory {}", args.input_dir.display())
            })?;
            info!("Using {} sample IDs as metadata.", ids.len());
            MetadataSource::from_table(Metadata::from_sample_ids(ids))
        }
    };

    let aggregator = ReportAggregator::new(
        &args.output_dir,
        ReadCountFilter::new(args.read_count, args.max_read_count),
    );
    match aggregator.aggregate(source) {
        Ok(aggregation) => summary.aggregation = Some(aggregation),
        Err(e) => error!("Error aggregating Kraken results: {}", e),
    }

    println!("{}", generate_report(&summary)?);

    if summary.aggregation.is_none() {
        bail!("Aggregation of Kraken2 reports failed");
    }
    Ok(())
}

fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let aggregator = ReportAggregator::new(
        &args.report_dir,
        ReadCountFilter::new(args.read_count, args.max_read_count),
    );

    let source = match args.metadata_file {
        Some(path) if !args.no_metadata => MetadataSource::from_file(path),
        _ => {
            let ids = aggregator.report_sample_ids().with_context(|| {
                format!("Failed to list reports in {}", args.report_dir.display())
            })?;
            info!("Using {} report sample IDs as metadata.", ids.len());
            MetadataSource::from_table(Metadata::from_sample_ids(ids))
        }
    };

    let aggregation = aggregator
        .aggregate(source)
        .context("Error aggregating Kraken results")?;
    println!(
        "Merged {} species records from {} reports into {}",
        aggregation.records,
        aggregation.reports_scanned,
        aggregation.merged_table.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_metadata_choice() {
        let missing = Cli::try_parse_from([
            "kraken-abundance",
            "run",
            "--kraken-db",
            "db",
            "-o",
            "out",
            "-i",
            "in",
        ]);
        assert!(missing.is_err());

        let both = Cli::try_parse_from([
            "kraken-abundance",
            "run",
            "--kraken-db",
            "db",
            "-o",
            "out",
            "-i",
            "in",
            "--no-metadata",
            "--metadata-file",
            "m.csv",
        ]);
        assert!(both.is_err());

        let cli = Cli::try_parse_from([
            "kraken-abundance",
            "-v",
            "run",
            "--kraken-db",
            "db",
            "-o",
            "out",
            "-i",
            "in",
            "--no-metadata",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.threads, 8);
                assert_eq!(args.read_count, 1);
                assert!(args.host_index.is_none());
            }
            Commands::Aggregate(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_with_precomputed_reports() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        for name in ["S1_R1.fastq", "S1_R2.fastq", "S2_R1.fastq", "S2_R2.fastq"] {
            fs::write(input.join(name), "").unwrap();
        }
        // S2 has no precomputed report and is skipped.
        fs::write(
            output.join("S1_report.txt"),
            "12.5\t100\t50\tS\t9606\tHomo sapiens\n3.1\t20\t10\tG\t9605\tHomo\n",
        )
        .unwrap();

        let args = RunArgs {
            kraken_db: dir.path().join("no_db"),
            host_index: None,
            output_dir: output.clone(),
            input_dir: input,
            threads: 1,
            metadata_file: None,
            no_metadata: true,
            read_count: 30,
            max_read_count: None,
            no_host_depletion: false,
            use_precomputed_reports: true,
            count_reads: false,
            tool_config: None,
        };
        run_pipeline(args).unwrap();

        let merged = fs::read_to_string(output.join("merged_kraken1.tsv")).unwrap();
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "12.5\t100\t50\tS\t9606\tHomo sapiens\tS1");
    }

    #[test]
    fn test_run_without_metadata_keeps_forward_only_samples() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::write(input.join("solo_R1.fastq.gz"), "").unwrap();
        fs::write(
            output.join("solo_report.txt"),
            "5.0\t7\t7\tS\t562\tEscherichia coli\n",
        )
        .unwrap();

        let args = RunArgs {
            kraken_db: dir.path().join("no_db"),
            host_index: None,
            output_dir: output.clone(),
            input_dir: input,
            threads: 1,
            metadata_file: None,
            no_metadata: true,
            read_count: 1,
            max_read_count: None,
            no_host_depletion: false,
            use_precomputed_reports: true,
            count_reads: false,
            tool_config: None,
        };
        run_pipeline(args).unwrap();

        let merged = fs::read_to_string(output.join("merged_kraken1.tsv")).unwrap();
        assert!(merged.ends_with("5.0\t7\t7\tS\t562\tEscherichia coli\tsolo\n"));
    }

    #[test]
    fn test_run_rejects_missing_kraken_db() {
        let dir = tempdir().unwrap();
        let args = RunArgs {
            kraken_db: dir.path().join("no_db"),
            host_index: None,
            output_dir: dir.path().join("out"),
            input_dir: dir.path().to_path_buf(),
            threads: 1,
            metadata_file: None,
            no_metadata: true,
            read_count: 1,
            max_read_count: None,
            no_host_depletion: false,
            use_precomputed_reports: false,
            count_reads: false,
            tool_config: None,
        };
        assert!(run_pipeline(args).is_err());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_aggregate_with_report_ids_as_metadata() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("A_report.txt"),
            "5.0\t7\t7\tS\t562\tEscherichia coli\n",
        )
        .unwrap();

        run_aggregate(AggregateArgs {
            report_dir: dir.path().to_path_buf(),
            metadata_file: None,
            no_metadata: true,
            read_count: 1,
            max_read_count: None,
        })
        .unwrap();

        let merged = fs::read_to_string(dir.path().join("merged_kraken1.tsv")).unwrap();
        assert!(merged.ends_with("5.0\t7\t7\tS\t562\tEscherichia coli\tA\n"));
        let ids = fs::read_to_string(dir.path().join("sample_ids.csv")).unwrap();
        assert_eq!(ids, "Sample_IDs\nA\n");
    }
}
