use thiserror::Error;

use crate::types::{PatientId, RecordId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("patient '{0}' is not present in the evidence store")]
    PatientNotFound(PatientId),
    #[error("record '{0}' is not present in the evidence store")]
    RecordNotFound(RecordId),
    #[error("record '{0}' carries an inline value, not document text")]
    NotADocument(RecordId),
    #[error("record '{record_id}' belongs to '{first_patient}' and is also claimed by '{second_patient}'")]
    DuplicateRecord {
        record_id: RecordId,
        first_patient: PatientId,
        second_patient: PatientId,
    },
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("malformed evidence file {path}: {message}")]
    Malformed { path: String, message: String },
}
