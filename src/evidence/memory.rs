use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::Date;

use crate::{
    evidence::{error::EvidenceError, ports::EvidenceSourcePort},
    prioritizer::scoring::TypePriorityTable,
    types::{
        DateRange, EvidenceRecord, PatientId, RecordContent, RecordId, SourceKind,
        StructuredEvent,
    },
};

#[derive(Debug, Default, Clone)]
struct PatientEvidence {
    records: Vec<EvidenceRecord>,
    structured_events: Vec<StructuredEvent>,
}

/// Evidence held in process memory. Populated up front, then shared read-only.
///
/// Record ids are unique across the whole store; a record id already owned by one
/// patient is never attached to another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEvidenceStore {
    priorities: TypePriorityTable,
    patients: BTreeMap<PatientId, PatientEvidence>,
    texts: HashMap<RecordId, String>,
    owners: HashMap<RecordId, PatientId>,
}

impl InMemoryEvidenceStore {
    pub fn new(priorities: TypePriorityTable) -> Self {
        Self {
            priorities,
            patients: BTreeMap::new(),
            texts: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Builder form of [`Self::try_insert_document`]; a duplicate id is logged and dropped.
    pub fn insert_document(
        &mut self,
        patient_id: &str,
        record_id: &str,
        source_kind: SourceKind,
        record_date: Date,
        text: impl Into<String>,
    ) -> &mut Self {
        let inserted =
            self.try_insert_document(patient_id, record_id, source_kind, record_date, text);
        if let Err(err) = inserted {
            warn_dropped(&err);
        }
        self
    }

    pub fn try_insert_document(
        &mut self,
        patient_id: &str,
        record_id: &str,
        source_kind: SourceKind,
        record_date: Date,
        text: impl Into<String>,
    ) -> Result<&mut Self, EvidenceError> {
        self.claim(patient_id, record_id)?;
        let record = EvidenceRecord {
            record_id: record_id.to_string(),
            patient_id: patient_id.to_string(),
            source_kind,
            record_date,
            text_or_value: RecordContent::Document,
            priority_weight: self.priorities.priority(source_kind),
        };
        self.texts.insert(record_id.to_string(), text.into());
        self.patient_mut(patient_id).records.push(record);
        Ok(self)
    }

    pub fn insert_structured_field(
        &mut self,
        patient_id: &str,
        record_id: &str,
        record_date: Date,
        field: &str,
        value: &str,
    ) -> &mut Self {
        let inserted =
            self.try_insert_structured_field(patient_id, record_id, record_date, field, value);
        if let Err(err) = inserted {
            warn_dropped(&err);
        }
        self
    }

    pub fn try_insert_structured_field(
        &mut self,
        patient_id: &str,
        record_id: &str,
        record_date: Date,
        field: &str,
        value: &str,
    ) -> Result<&mut Self, EvidenceError> {
        self.claim(patient_id, record_id)?;
        let record = EvidenceRecord {
            record_id: record_id.to_string(),
            patient_id: patient_id.to_string(),
            source_kind: SourceKind::StructuredField,
            record_date,
            text_or_value: RecordContent::Structured {
                field: field.to_string(),
                value: value.to_string(),
            },
            priority_weight: self.priorities.priority(SourceKind::StructuredField),
        };
        self.patient_mut(patient_id).records.push(record);
        Ok(self)
    }

    pub fn insert_structured_event(&mut self, event: StructuredEvent) -> &mut Self {
        let patient_id = event.patient_id.clone();
        self.patient_mut(&patient_id).structured_events.push(event);
        self
    }

    /// Registers a patient with no evidence at all.
    pub fn insert_patient(&mut self, patient_id: &str) -> &mut Self {
        self.patient_mut(patient_id);
        self
    }

    pub fn record_count(&self) -> usize {
        self.patients.values().map(|p| p.records.len()).sum()
    }

    fn patient_mut(&mut self, patient_id: &str) -> &mut PatientEvidence {
        self.patients.entry(patient_id.to_string()).or_default()
    }

    fn claim(&mut self, patient_id: &str, record_id: &str) -> Result<(), EvidenceError> {
        if let Some(owner) = self.owners.get(record_id) {
            return Err(EvidenceError::DuplicateRecord {
                record_id: record_id.to_string(),
                first_patient: owner.clone(),
                second_patient: patient_id.to_string(),
            });
        }
        self.owners
            .insert(record_id.to_string(), patient_id.to_string());
        Ok(())
    }
}

fn warn_dropped(err: &EvidenceError) {
    tracing::warn!(target: "evidence", error = %err, "duplicate_record_dropped");
}

#[async_trait]
impl EvidenceSourcePort for InMemoryEvidenceStore {
    async fn list_patients(&self) -> Result<Vec<PatientId>, EvidenceError> {
        Ok(self.patients.keys().cloned().collect())
    }

    async fn list_records(
        &self,
        patient_id: &str,
        source_kind: SourceKind,
        date_range: DateRange,
    ) -> Result<Vec<EvidenceRecord>, EvidenceError> {
        let patient = self
            .patients
            .get(patient_id)
            .ok_or_else(|| EvidenceError::PatientNotFound(patient_id.to_string()))?;

        Ok(patient
            .records
            .iter()
            .filter(|record| {
                record.source_kind == source_kind && date_range.contains(record.record_date)
            })
            .cloned()
            .collect())
    }

    async fn fetch_text(&self, record_id: &str) -> Result<String, EvidenceError> {
        if let Some(text) = self.texts.get(record_id) {
            return Ok(text.clone());
        }

        if self.owners.contains_key(record_id) {
            return Err(EvidenceError::NotADocument(record_id.to_string()));
        }
        Err(EvidenceError::RecordNotFound(record_id.to_string()))
    }

    async fn list_structured_events(
        &self,
        patient_id: &str,
    ) -> Result<Vec<StructuredEvent>, EvidenceError> {
        self.patients
            .get(patient_id)
            .map(|p| p.structured_events.clone())
            .ok_or_else(|| EvidenceError::PatientNotFound(patient_id.to_string()))
    }
}
