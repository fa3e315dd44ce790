use thiserror::Error;

use crate::{evidence::EvidenceError, types::PatientId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    /// No surgical or diagnostic anchor exists; reported, never retried.
    #[error("patient '{patient_id}' has no surgical or diagnostic events")]
    InsufficientData { patient_id: PatientId },
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}
