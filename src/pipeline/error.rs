use thiserror::Error;

use crate::{evidence::EvidenceError, timeline::TimelineError, types::PatientId};

/// Patient-level failures; everything below this level is absorbed by the fallback controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error("run for patient '{patient_id}' was cancelled before any event completed")]
    Cancelled { patient_id: PatientId },
    #[error("worker for patient '{patient_id}' stopped unexpectedly: {message}")]
    WorkerFailed {
        patient_id: PatientId,
        message: String,
    },
}

impl PipelineError {
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            Self::Timeline(TimelineError::InsufficientData { .. })
        )
    }
}
