use async_trait::async_trait;

use crate::{
    evidence::error::EvidenceError,
    types::{DateRange, EvidenceRecord, PatientId, SourceKind, StructuredEvent},
};

/// Read-only view over a document and structured-record store.
#[async_trait]
pub trait EvidenceSourcePort: Send + Sync {
    async fn list_patients(&self) -> Result<Vec<PatientId>, EvidenceError>;

    /// Records of one kind whose `record_date` falls inside `date_range` (inclusive).
    async fn list_records(
        &self,
        patient_id: &str,
        source_kind: SourceKind,
        date_range: DateRange,
    ) -> Result<Vec<EvidenceRecord>, EvidenceError>;

    async fn fetch_text(&self, record_id: &str) -> Result<String, EvidenceError>;

    /// Procedure, diagnosis and medication rows feeding the timeline.
    async fn list_structured_events(
        &self,
        patient_id: &str,
    ) -> Result<Vec<StructuredEvent>, EvidenceError>;
}
