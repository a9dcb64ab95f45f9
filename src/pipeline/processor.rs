use crate::io::fastq::{count_records, ReadPair, Sample};
use crate::kraken_report::report_path;
use log::{debug, error, info};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

// --- Error Type ---
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Precomputed Kraken2 report not found: {}", .0.display())]
    MissingPrecomputedReport(PathBuf),

    #[error("Host depletion requested but no host index was given")]
    MissingHostIndex,

    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} finished but did not produce {}", .path.display())]
    MissingToolOutput { tool: String, path: PathBuf },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to count reads in {}: {source}", .path.display())]
    ReadCount {
        path: PathBuf,
        #[source]
        source: needletail::errors::ParseError,
    },
}

/// Per-sample values handed to every tool invocation.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub sample_id: &'a str,
    pub output_dir: &'a Path,
    pub threads: usize,
}

/// Quality trimming of a read pair.
pub trait Trimmer {
    fn trim(&self, reads: &ReadPair, ctx: &ToolContext<'_>) -> Result<ReadPair, ProcessingError>;
}

/// Removal of reads that align to a host reference. Returns the pair of
/// reads that did not align.
pub trait HostDepleter {
    fn deplete(
        &self,
        reads: &ReadPair,
        host_index: &Path,
        ctx: &ToolContext<'_>,
    ) -> Result<ReadPair, ProcessingError>;
}

/// Taxonomic classification of a read pair into a report file.
pub trait Classifier {
    fn classify(
        &self,
        reads: &ReadPair,
        database: &Path,
        ctx: &ToolContext<'_>,
    ) -> Result<PathBuf, ProcessingError>;
}

/// Settings shared by every sample in a run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub kraken_db: PathBuf,
    pub host_index: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub run_host_depletion: bool,
    pub use_precomputed: bool,
    /// Count forward reads after each step (slow on large inputs).
    pub count_reads: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStage {
    Input,
    Trimmed,
    HostDepleted,
}

impl fmt::Display for ReadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadStage::Input => "input",
            ReadStage::Trimmed => "trimmed",
            ReadStage::HostDepleted => "host-depleted",
        };
        f.write_str(name)
    }
}

/// Result of processing one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub sample_id: String,
    pub report: PathBuf,
    pub precomputed: bool,
    pub read_counts: Vec<(ReadStage, u64)>,
}

/// Runs trimming, optional host depletion and classification for one
/// sample at a time.
pub struct SampleProcessor {
    config: ProcessorConfig,
    trimmer: Box<dyn Trimmer>,
    depleter: Box<dyn HostDepleter>,
    classifier: Box<dyn Classifier>,
}

impl SampleProcessor {
    pub fn new(
        config: ProcessorConfig,
        trimmer: Box<dyn Trimmer>,
        depleter: Box<dyn HostDepleter>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        SampleProcessor {
            config,
            trimmer,
            depleter,
            classifier,
        }
    }

    /// Produces the classification report for `sample`.
    ///
    /// With `use_precomputed` the report must already exist at
    /// `<output_dir>/<sample_id>_report.txt`; nothing is run or written.
    pub fn process(&self, sample: &Sample) -> Result<SampleOutcome, ProcessingError> {
        let sample_id = sample.sample_id.as_str();

        if self.config.use_precomputed {
            let report = report_path(&self.config.output_dir, sample_id);
            if !report.is_file() {
                return Err(ProcessingError::MissingPrecomputedReport(report));
            }
            info!("[{}] Using precomputed report {}", sample_id, report.display());
            return Ok(SampleOutcome {
                sample_id: sample_id.to_string(),
                report,
                precomputed: true,
                read_counts: Vec::new(),
            });
        }

        let host_index = if self.config.run_host_depletion {
            Some(
                self.config
                    .host_index
                    .as_deref()
                    .ok_or(ProcessingError::MissingHostIndex)?,
            )
        } else {
            None
        };

        let start_time = Instant::now();
        fs::create_dir_all(&self.config.output_dir)?;
        let ctx = ToolContext {
            sample_id,
            output_dir: &self.config.output_dir,
            threads: self.config.threads.max(1),
        };
        let mut read_counts = Vec::new();
        self.record_reads(sample_id, ReadStage::Input, &sample.reads, &mut read_counts)?;

        info!("[{}] Trimming reads", sample_id);
        let trimmed = self.trimmer.trim(&sample.reads, &ctx)?;
        self.record_reads(sample_id, ReadStage::Trimmed, &trimmed, &mut read_counts)?;

        let reads = match host_index {
            Some(index) => {
                info!("[{}] Removing host reads against {}", sample_id, index.display());
                let depleted = self.depleter.deplete(&trimmed, index, &ctx)?;
                self.record_reads(sample_id, ReadStage::HostDepleted, &depleted, &mut read_counts)?;
                depleted
            }
            None => {
                debug!("[{}] Host depletion disabled", sample_id);
                trimmed
            }
        };

        info!("[{}] Classifying reads", sample_id);
        let report = self
            .classifier
            .classify(&reads, &self.config.kraken_db, &ctx)?;

        info!(
            "[{}] Finished in {:.2} seconds, report at {}",
            sample_id,
            start_time.elapsed().as_secs_f64(),
            report.display()
        );
        Ok(SampleOutcome {
            sample_id: sample_id.to_string(),
            report,
            precomputed: false,
            read_counts,
        })
    }

    /// Like [`process`](Self::process), but logs a failure and returns
    /// `None` so the caller can move on to the next sample.
    pub fn process_or_skip(&self, sample: &Sample) -> Option<SampleOutcome> {
        match self.process(sample) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Error processing sample {}: {}", sample.sample_id, e);
                None
            }
        }
    }

    fn record_reads(
        &self,
        sample_id: &str,
        stage: ReadStage,
        reads: &ReadPair,
        counts: &mut Vec<(ReadStage, u64)>,
    ) -> Result<(), ProcessingError> {
        if !self.config.count_reads {
            return Ok(());
        }
        let n = count_records(&reads.forward).map_err(|source| ProcessingError::ReadCount {
            path: reads.forward.clone(),
            source,
        })?;
        info!("[{}] {} read pairs: {}", sample_id, stage, n);
        counts.push((stage, n));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct FakeTrimmer(CallLog);
    struct FakeDepleter(CallLog);
    struct FakeClassifier(CallLog);
    struct FailingTrimmer;

    fn renamed(ctx: &ToolContext<'_>, tag: &str) -> ReadPair {
        ReadPair::new(
            ctx.output_dir.join(format!("{}_{}_1.fq", ctx.sample_id, tag)),
            ctx.output_dir.join(format!("{}_{}_2.fq", ctx.sample_id, tag)),
        )
    }

    impl Trimmer for FakeTrimmer {
        fn trim(&self, reads: &ReadPair, ctx: &ToolContext<'_>) -> Result<ReadPair, ProcessingError> {
            self.0
                .borrow_mut()
                .push(format!("trim {}", reads.forward.display()));
            Ok(renamed(ctx, "trimmed"))
        }
    }

    impl HostDepleter for FakeDepleter {
        fn deplete(
            &self,
            reads: &ReadPair,
            host_index: &Path,
            ctx: &ToolContext<'_>,
        ) -> Result<ReadPair, ProcessingError> {
            self.0.borrow_mut().push(format!(
                "deplete {} {}",
                reads.forward.file_name().unwrap().to_string_lossy(),
                host_index.display()
            ));
            Ok(renamed(ctx, "unmapped"))
        }
    }

    impl Classifier for FakeClassifier {
        fn classify(
            &self,
            reads: &ReadPair,
            database: &Path,
            ctx: &ToolContext<'_>,
        ) -> Result<PathBuf, ProcessingError> {
            self.0.borrow_mut().push(format!(
                "classify {} {}",
                reads.forward.file_name().unwrap().to_string_lossy(),
                database.display()
            ));
            Ok(report_path(ctx.output_dir, ctx.sample_id))
        }
    }

    impl Trimmer for FailingTrimmer {
        fn trim(&self, _reads: &ReadPair, _ctx: &ToolContext<'_>) -> Result<ReadPair, ProcessingError> {
            Err(ProcessingError::ToolFailed {
                tool: "trimmomatic".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "bad input".to_string(),
            })
        }
    }

    fn config(output_dir: &Path) -> ProcessorConfig {
        ProcessorConfig {
            kraken_db: PathBuf::from("/db/kraken"),
            host_index: Some(PathBuf::from("/db/host")),
            output_dir: output_dir.to_path_buf(),
            threads: 4,
            run_host_depletion: true,
            use_precomputed: false,
            count_reads: false,
        }
    }

    fn processor(config: ProcessorConfig, log: &CallLog) -> SampleProcessor {
        SampleProcessor::new(
            config,
            Box::new(FakeTrimmer(log.clone())),
            Box::new(FakeDepleter(log.clone())),
            Box::new(FakeClassifier(log.clone())),
        )
    }

    fn sample(id: &str) -> Sample {
        Sample {
            sample_id: id.to_string(),
            reads: ReadPair::new(format!("/in/{}_R1.fastq", id), format!("/in/{}_R2.fastq", id)),
        }
    }

    #[test]
    fn test_precomputed_report_is_returned_without_running_tools() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("S1_report.txt");
        fs::write(&existing, "").unwrap();

        let log = CallLog::default();
        let mut cfg = config(dir.path());
        cfg.use_precomputed = true;
        let outcome = processor(cfg, &log).process(&sample("S1")).unwrap();

        assert_eq!(outcome.report, existing);
        assert!(outcome.precomputed);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_missing_precomputed_report_fails_without_writes() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("not_created");

        let log = CallLog::default();
        let mut cfg = config(&output_dir);
        cfg.use_precomputed = true;
        let proc = processor(cfg, &log);

        let result = proc.process(&sample("S1"));
        assert!(matches!(
            result,
            Err(ProcessingError::MissingPrecomputedReport(ref p)) if *p == output_dir.join("S1_report.txt")
        ));
        assert!(proc.process_or_skip(&sample("S1")).is_none());
        assert!(!output_dir.exists());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_full_pipeline_with_host_depletion() {
        let dir = tempdir().unwrap();
        let log = CallLog::default();
        let outcome = processor(config(dir.path()), &log)
            .process(&sample("S1"))
            .unwrap();

        assert_eq!(outcome.report, dir.path().join("S1_report.txt"));
        assert!(!outcome.precomputed);
        assert_eq!(
            *log.borrow(),
            vec![
                "trim /in/S1_R1.fastq".to_string(),
                "deplete S1_trimmed_1.fq /db/host".to_string(),
                "classify S1_unmapped_1.fq /db/kraken".to_string(),
            ]
        );
    }

    #[test]
    fn test_classifier_gets_trimmed_reads_without_depletion() {
        let dir = tempdir().unwrap();
        let log = CallLog::default();
        let mut cfg = config(dir.path());
        cfg.run_host_depletion = false;
        cfg.host_index = None;
        processor(cfg, &log).process(&sample("S1")).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "trim /in/S1_R1.fastq".to_string(),
                "classify S1_trimmed_1.fq /db/kraken".to_string(),
            ]
        );
    }

    #[test]
    fn test_depletion_without_index_is_an_error() {
        let dir = tempdir().unwrap();
        let log = CallLog::default();
        let mut cfg = config(dir.path());
        cfg.host_index = None;

        let result = processor(cfg, &log).process(&sample("S1"));
        assert!(matches!(result, Err(ProcessingError::MissingHostIndex)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_tool_failure_stops_the_sample() {
        let dir = tempdir().unwrap();
        let log = CallLog::default();
        let proc = SampleProcessor::new(
            config(dir.path()),
            Box::new(FailingTrimmer),
            Box::new(FakeDepleter(log.clone())),
            Box::new(FakeClassifier(log.clone())),
        );

        let result = proc.process(&sample("S1"));
        assert!(matches!(result, Err(ProcessingError::ToolFailed { .. })));
        assert!(proc.process_or_skip(&sample("S1")).is_none());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_read_counts_per_stage() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in_R1.fastq");
        fs::write(&input, "@r1\nACGT\n+\n!!!!\n@r2\nACGT\n+\n!!!!\n").unwrap();
        let trimmed = dir.path().join("S1_trimmed_1.fq");
        fs::write(&trimmed, "@r1\nACGT\n+\n!!!!\n").unwrap();
        let unmapped = dir.path().join("S1_unmapped_1.fq");
        fs::write(&unmapped, "").unwrap();

        let log = CallLog::default();
        let mut cfg = config(dir.path());
        cfg.count_reads = true;
        let s = Sample {
            sample_id: "S1".to_string(),
            reads: ReadPair::new(&input, dir.path().join("in_R2.fastq")),
        };
        let outcome = processor(cfg, &log).process(&s).unwrap();

        assert_eq!(
            outcome.read_counts,
            vec![
                (ReadStage::Input, 2),
                (ReadStage::Trimmed, 1),
                (ReadStage::HostDepleted, 0),
            ]
        );
    }
}
