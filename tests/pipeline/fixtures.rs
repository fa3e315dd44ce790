use std::{collections::BTreeMap, sync::Arc};

use time::{Date, macros::date};

use abstractor::{
    evidence::{EvidenceSourcePort, InMemoryEvidenceStore},
    extractor::{ExtractionConfig, VariableExtractor},
    fallback::{AbstractionConfig, FallbackController, NoopConflictReviewer},
    formatter::{DataDictionary, ResultFormatter, VariableDictionary},
    pipeline::PatientRunner,
    prioritizer::TypePriorityTable,
    timeline::TimelineBuilder,
    types::{SourceKind, StructuredCategory, StructuredEvent},
};

use crate::support::{ScriptedCompletionPort, extent_of_resection};

fn resection(patient_id: &str, record_id: &str, date: Date) -> StructuredEvent {
    StructuredEvent {
        record_id: record_id.to_string(),
        patient_id: patient_id.to_string(),
        category: StructuredCategory::Procedure,
        code: "61518".to_string(),
        description: Some("Craniectomy for excision of infratentorial tumor".to_string()),
        date,
    }
}

/// Four patients:
/// - `p1` agrees on gross total resection across operative note and discharge summary.
/// - `p2` has no structured rows, so no timeline.
/// - `p3` has operative note and post-op MRI disagreeing; the MRI settles it.
/// - `p4` has a surgery but no narrative evidence at all.
pub fn cohort() -> InMemoryEvidenceStore {
    let mut store = InMemoryEvidenceStore::new(TypePriorityTable::default());
    store
        .insert_structured_event(resection("p1", "p1-proc", date!(2018 - 05 - 28)))
        .insert_document(
            "p1",
            "p1-op",
            SourceKind::OperativeNote,
            date!(2018 - 05 - 28),
            "[p1-op] Gross total resection of vermian mass.",
        )
        .insert_document(
            "p1",
            "p1-dc",
            SourceKind::DischargeSummary,
            date!(2018 - 06 - 02),
            "[p1-dc] Discharged after GTR.",
        )
        .insert_patient("p2")
        .insert_structured_event(resection("p3", "p3-proc", date!(2020 - 03 - 10)))
        .insert_document(
            "p3",
            "p3-op",
            SourceKind::OperativeNote,
            date!(2020 - 03 - 10),
            "[p3-op] Subtotal resection, residual along the brainstem.",
        )
        .insert_document(
            "p3",
            "p3-mri",
            SourceKind::ImagingNarrative,
            date!(2020 - 03 - 11),
            "[p3-mri] Thin residual enhancement consistent with near-total debulking.",
        )
        .insert_structured_event(resection("p4", "p4-proc", date!(2019 - 01 - 15)));
    store
}

pub fn port() -> Arc<ScriptedCompletionPort> {
    Arc::new(
        ScriptedCompletionPort::new()
            .answer("[p1-op]", "Gross total resection")
            .answer("[p1-dc]", "GTR")
            .answer("[p3-op]", "Subtotal resection")
            .answer("[p3-mri]", "NTR"),
    )
}

pub fn dictionary() -> DataDictionary {
    DataDictionary::default().with_variable(
        "extent_of_resection",
        VariableDictionary {
            codes: BTreeMap::from([
                ("Gross total resection".to_string(), "1".to_string()),
                ("Near-total resection".to_string(), "2".to_string()),
                ("Subtotal resection".to_string(), "3".to_string()),
            ]),
            unavailable_code: Some("9".to_string()),
        },
    )
}

pub fn runner(port: Arc<ScriptedCompletionPort>) -> Arc<PatientRunner> {
    let store: Arc<dyn EvidenceSourcePort> = Arc::new(cohort());
    let controller = FallbackController::new(
        AbstractionConfig::default(),
        VariableExtractor::new(port, ExtractionConfig::default()),
        Arc::new(NoopConflictReviewer),
    );
    Arc::new(PatientRunner::new(
        store,
        TimelineBuilder::default(),
        Arc::new(controller),
        ResultFormatter::new(dictionary()),
        vec![extent_of_resection()],
    ))
}
