pub mod adapters;
pub mod engine;
pub mod error;
pub mod ports;
pub mod prompts;

pub use engine::{
    ExtractionConfig, ExtractionJob, ExtractionOutcome, ExtractionResult, NotFoundReason,
    ReviewConfig, VariableExtractor,
};
pub use error::ExtractionError;
pub use ports::{CompletionError, CompletionErrorKind, TextCompletionPort};
