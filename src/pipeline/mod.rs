pub mod processor;
pub mod report;
pub mod tools;

pub use processor::{ProcessorConfig, SampleProcessor};
pub use report::{generate_report, RunSummary};
