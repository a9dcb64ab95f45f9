//! Adapters that run Trimmomatic, Bowtie2 and Kraken2 as external programs.

use crate::config::{Bowtie2Config, Kraken2Config, ToolConfig, TrimmomaticConfig};
use crate::io::fastq::ReadPair;
use crate::kraken_report::report_path;
use crate::pipeline::processor::{
    Classifier, HostDepleter, ProcessingError, SampleProcessor, ProcessorConfig, ToolContext,
    Trimmer,
};
use itertools::Itertools;
use log::debug;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of stderr kept in a `ToolFailed` error.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `program` with `args`, waiting for it to finish.
pub fn run_tool(tool: &str, program: &str, args: &[OsString]) -> Result<(), ProcessingError> {
    debug!(
        "Running command: {} {}",
        program,
        args.iter().map(|a| a.to_string_lossy()).join(" ")
    );

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ProcessingError::ToolLaunch {
            tool: tool.to_string(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        return Err(ProcessingError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: tail,
        });
    }

    for line in stderr.lines() {
        debug!("[{}] {}", tool, line);
    }
    Ok(())
}

/// Fails with `MissingToolOutput` for the first path that does not exist.
pub fn ensure_outputs(tool: &str, paths: &[&Path]) -> Result<(), ProcessingError> {
    match paths.iter().find(|p| !p.exists()) {
        Some(missing) => Err(ProcessingError::MissingToolOutput {
            tool: tool.to_string(),
            path: missing.to_path_buf(),
        }),
        None => Ok(()),
    }
}

fn pair_in(ctx: &ToolContext<'_>, tag: &str) -> ReadPair {
    ReadPair::new(
        ctx.output_dir
            .join(format!("{}_{}_1.fastq.gz", ctx.sample_id, tag)),
        ctx.output_dir
            .join(format!("{}_{}_2.fastq.gz", ctx.sample_id, tag)),
    )
}

pub struct Trimmomatic {
    config: TrimmomaticConfig,
}

impl Trimmomatic {
    pub fn new(config: TrimmomaticConfig) -> Self {
        Trimmomatic { config }
    }

    /// Command-line arguments and the paired outputs they produce.
    pub fn arguments(&self, reads: &ReadPair, ctx: &ToolContext<'_>) -> (Vec<OsString>, ReadPair) {
        let paired = pair_in(ctx, "trimmed");
        let unpaired = pair_in(ctx, "unpaired");

        let mut args: Vec<OsString> = vec![
            "PE".into(),
            "-threads".into(),
            ctx.threads.to_string().into(),
        ];
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args.extend([
            reads.forward.clone().into_os_string(),
            reads.reverse.clone().into_os_string(),
            paired.forward.clone().into_os_string(),
            unpaired.forward.into_os_string(),
            paired.reverse.clone().into_os_string(),
            unpaired.reverse.into_os_string(),
        ]);
        args.extend(self.config.steps.iter().map(OsString::from));
        (args, paired)
    }
}

impl Trimmer for Trimmomatic {
    fn trim(&self, reads: &ReadPair, ctx: &ToolContext<'_>) -> Result<ReadPair, ProcessingError> {
        let (args, paired) = self.arguments(reads, ctx);
        run_tool("trimmomatic", &self.config.executable, &args)?;
        ensure_outputs("trimmomatic", &[paired.forward.as_path(), paired.reverse.as_path()])?;
        Ok(paired)
    }
}

pub struct Bowtie2 {
    config: Bowtie2Config,
}

impl Bowtie2 {
    pub fn new(config: Bowtie2Config) -> Self {
        Bowtie2 { config }
    }

    /// Aligns against the host and writes only the read pairs that failed to
    /// align concordantly; the alignments themselves are discarded.
    pub fn arguments(
        &self,
        reads: &ReadPair,
        host_index: &Path,
        ctx: &ToolContext<'_>,
    ) -> (Vec<OsString>, ReadPair) {
        let unmapped = pair_in(ctx, "host_removed");
        let pattern = ctx
            .output_dir
            .join(format!("{}_host_removed_%.fastq.gz", ctx.sample_id));

        let mut args: Vec<OsString> = vec![
            "-x".into(),
            host_index.as_os_str().to_owned(),
            "-1".into(),
            reads.forward.clone().into_os_string(),
            "-2".into(),
            reads.reverse.clone().into_os_string(),
            "-p".into(),
            ctx.threads.to_string().into(),
            "--un-conc-gz".into(),
            pattern.into_os_string(),
            "-S".into(),
            "/dev/null".into(),
        ];
        args.extend(self.config.extra_args.iter().map(OsString::from));
        (args, unmapped)
    }
}

impl HostDepleter for Bowtie2 {
    fn deplete(
        &self,
        reads: &ReadPair,
        host_index: &Path,
        ctx: &ToolContext<'_>,
    ) -> Result<ReadPair, ProcessingError> {
        let (args, unmapped) = self.arguments(reads, host_index, ctx);
        run_tool("bowtie2", &self.config.executable, &args)?;
        ensure_outputs("bowtie2", &[unmapped.forward.as_path(), unmapped.reverse.as_path()])?;
        Ok(unmapped)
    }
}

pub struct Kraken2 {
    config: Kraken2Config,
}

impl Kraken2 {
    pub fn new(config: Kraken2Config) -> Self {
        Kraken2 { config }
    }

    /// Arguments for a paired-end run, and the report path it writes.
    pub fn arguments(
        &self,
        reads: &ReadPair,
        database: &Path,
        ctx: &ToolContext<'_>,
    ) -> (Vec<OsString>, PathBuf) {
        let report = report_path(ctx.output_dir, ctx.sample_id);
        let classifications = ctx
            .output_dir
            .join(format!("{}_kraken.txt", ctx.sample_id));

        let mut args: Vec<OsString> = vec![
            "--db".into(),
            database.as_os_str().to_owned(),
            "--threads".into(),
            ctx.threads.to_string().into(),
        ];
        if let Some(confidence) = self.config.confidence {
            args.push("--confidence".into());
            args.push(confidence.to_string().into());
        }
        args.extend([
            "--report".into(),
            report.clone().into_os_string(),
            "--output".into(),
            classifications.into_os_string(),
        ]);
        if reads.is_gzipped() {
            args.push("--gzip-compressed".into());
        }
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args.extend([
            "--paired".into(),
            reads.forward.clone().into_os_string(),
            reads.reverse.clone().into_os_string(),
        ]);
        (args, report)
    }
}

impl Classifier for Kraken2 {
    fn classify(
        &self,
        reads: &ReadPair,
        database: &Path,
        ctx: &ToolContext<'_>,
    ) -> Result<PathBuf, ProcessingError> {
        let (args, report) = self.arguments(reads, database, ctx);
        run_tool("kraken2", &self.config.executable, &args)?;
        ensure_outputs("kraken2", &[report.as_path()])?;
        Ok(report)
    }
}

impl SampleProcessor {
    /// A processor backed by the real Trimmomatic, Bowtie2 and Kraken2.
    pub fn with_external_tools(config: ProcessorConfig, tools: &ToolConfig) -> Self {
        SampleProcessor::new(
            config,
            Box::new(Trimmomatic::new(tools.trimmomatic.clone())),
            Box::new(Bowtie2::new(tools.bowtie2.clone())),
            Box::new(Kraken2::new(tools.kraken2.clone())),
        )
    }
}
