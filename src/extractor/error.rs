use thiserror::Error;

use crate::{
    evidence::EvidenceError,
    extractor::ports::CompletionError,
    types::{RecordId, VariableName},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Both the full-text call and the truncated retry timed out.
    #[error("extraction of '{variable}' from record '{record_id}' timed out after {attempts} attempts")]
    Timeout {
        record_id: RecordId,
        variable: VariableName,
        attempts: u32,
    },
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
}
