use crate::aggregate::Aggregation;
use crate::pipeline::processor::SampleOutcome;
use std::fmt::Write;

/// What happened over one pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub samples_found: usize,
    pub succeeded: Vec<SampleOutcome>,
    pub failed: Vec<String>,
    pub aggregation: Option<Aggregation>,
}

impl RunSummary {
    pub fn record(&mut self, sample_id: &str, outcome: Option<SampleOutcome>) {
        match outcome {
            Some(outcome) => self.succeeded.push(outcome),
            None => self.failed.push(sample_id.to_string()),
        }
    }
}

/// Generate a plain-text summary of a run.
pub fn generate_report(summary: &RunSummary) -> Result<String, std::fmt::Error> {
    let mut report = String::new();

    writeln!(report, "# Kraken2 abundance run")?;
    writeln!(report)?;
    writeln!(report, "Samples found:     {}", summary.samples_found)?;
    writeln!(report, "Samples processed: {}", summary.succeeded.len())?;
    writeln!(report, "Samples failed:    {}", summary.failed.len())?;

    let precomputed = summary.succeeded.iter().filter(|o| o.precomputed).count();
    if precomputed > 0 {
        writeln!(report, "Precomputed reports used: {}", precomputed)?;
    }

    if !summary.failed.is_empty() {
        writeln!(report)?;
        writeln!(report, "## Failed samples")?;
        for id in &summary.failed {
            writeln!(report, "- {}", id)?;
        }
    }

    let with_counts: Vec<_> = summary
        .succeeded
        .iter()
        .filter(|o| !o.read_counts.is_empty())
        .collect();
    if !with_counts.is_empty() {
        writeln!(report)?;
        writeln!(report, "## Read pairs per step")?;
        for outcome in with_counts {
            let steps: Vec<String> = outcome
                .read_counts
                .iter()
                .map(|(stage, n)| format!("{} {}", stage, n))
                .collect();
            writeln!(report, "- {}: {}", outcome.sample_id, steps.join(", "))?;
        }
    }

    writeln!(report)?;
    match &summary.aggregation {
        Some(agg) => {
            writeln!(report, "## Aggregation")?;
            writeln!(report, "Reports scanned: {}", agg.reports_scanned)?;
            writeln!(report, "Species records: {}", agg.records)?;
            writeln!(report, "Sample id entries: {}", agg.sample_id_entries)?;
            writeln!(report, "Merged table:    {}", agg.merged_table.display())?;
            writeln!(report, "Sample id list:  {}", agg.sample_ids.display())?;
        }
        None => writeln!(report, "Aggregation failed; no merged table was written.")?,
    }

    Ok(report)
}
