use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    evidence::{error::EvidenceError, memory::InMemoryEvidenceStore, ports::EvidenceSourcePort},
    prioritizer::scoring::TypePriorityTable,
    types::{
        DateRange, EvidenceRecord, PatientId, RecordId, SourceKind, StructuredCategory,
        StructuredEvent,
    },
};

fn default_evidence_root() -> PathBuf {
    PathBuf::from("./evidence")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default = "default_evidence_root")]
    pub root: PathBuf,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            root: default_evidence_root(),
        }
    }
}

/// On-disk layout of `<root>/<patient_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientEvidenceFile {
    pub patient_id: PatientId,
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
    #[serde(default)]
    pub structured_fields: Vec<StructuredFieldEntry>,
    #[serde(default)]
    pub structured_events: Vec<StructuredEventEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub record_id: RecordId,
    pub source_kind: SourceKind,
    pub record_date: Date,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFieldEntry {
    pub record_id: RecordId,
    pub record_date: Date,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEventEntry {
    pub record_id: RecordId,
    pub category: StructuredCategory,
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: Date,
}

/// Directory of per-patient JSON files, indexed once when opened.
pub struct JsonDirectoryStore {
    root: PathBuf,
    index: InMemoryEvidenceStore,
}

impl JsonDirectoryStore {
    pub async fn open(root: &Path, priorities: TypePriorityTable) -> Result<Self, EvidenceError> {
        let mut index = InMemoryEvidenceStore::new(priorities);
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|err| io_error(root, err))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| io_error(root, err))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|err| io_error(path, err))?;
            let file: PatientEvidenceFile =
                serde_json::from_str(&content).map_err(|err| EvidenceError::Malformed {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            load_patient(&mut index, file).map_err(|err| EvidenceError::Malformed {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        }

        tracing::info!(
            target: "evidence",
            root = %root.display(),
            patient_files = paths.len(),
            records = index.record_count(),
            "evidence_store_opened"
        );

        Ok(Self {
            root: root.to_path_buf(),
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn load_patient(
    index: &mut InMemoryEvidenceStore,
    file: PatientEvidenceFile,
) -> Result<(), EvidenceError> {
    let patient_id = file.patient_id;
    index.insert_patient(&patient_id);
    for doc in file.documents {
        index.try_insert_document(
            &patient_id,
            &doc.record_id,
            doc.source_kind,
            doc.record_date,
            doc.text,
        )?;
    }
    for field in file.structured_fields {
        index.try_insert_structured_field(
            &patient_id,
            &field.record_id,
            field.record_date,
            &field.field,
            &field.value,
        )?;
    }
    for event in file.structured_events {
        index.insert_structured_event(StructuredEvent {
            record_id: event.record_id,
            patient_id: patient_id.clone(),
            category: event.category,
            code: event.code,
            description: event.description,
            date: event.date,
        });
    }
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> EvidenceError {
    EvidenceError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl EvidenceSourcePort for JsonDirectoryStore {
    async fn list_patients(&self) -> Result<Vec<PatientId>, EvidenceError> {
        self.index.list_patients().await
    }

    async fn list_records(
        &self,
        patient_id: &str,
        source_kind: SourceKind,
        date_range: DateRange,
    ) -> Result<Vec<EvidenceRecord>, EvidenceError> {
        self.index
            .list_records(patient_id, source_kind, date_range)
            .await
    }

    async fn fetch_text(&self, record_id: &str) -> Result<String, EvidenceError> {
        self.index.fetch_text(record_id).await
    }

    async fn list_structured_events(
        &self,
        patient_id: &str,
    ) -> Result<Vec<StructuredEvent>, EvidenceError> {
        self.index.list_structured_events(patient_id).await
    }
}
