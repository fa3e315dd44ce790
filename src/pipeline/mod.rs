pub mod batch;
pub mod error;
pub mod output;
pub mod runner;

pub use batch::{BatchOutcome, BatchRunner, PatientFailure, PipelineConfig, RunSummary};
pub use error::PipelineError;
pub use runner::{PatientReport, PatientRunner};
