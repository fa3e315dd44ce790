use std::{sync::Arc, time::Duration};

use time::macros::date;

use abstractor::{
    aggregator::GoldStandardPolicy,
    evidence::InMemoryEvidenceStore,
    extractor::{ExtractionConfig, ReviewConfig, VariableExtractor},
    fallback::{AbstractionConfig, CompletionConflictReviewer, FallbackController},
    prioritizer::TypePriorityTable,
    types::{ClinicalEvent, EventType, FinalValue, SourceKind},
};

use crate::support::{Reply, ScriptedCompletionPort, extent_of_resection};

#[tokio::test]
async fn given_reviewer_flags_a_record_when_abstracting_then_its_reread_value_replaces_the_first() {
    let mut store = InMemoryEvidenceStore::new(TypePriorityTable::default());
    store
        .insert_document(
            "p1",
            "op-1",
            SourceKind::OperativeNote,
            date!(2018 - 05 - 28),
            "[op-1] Tumor debulked; small residual left on the brainstem.",
        )
        .insert_document(
            "p1",
            "mri-1",
            SourceKind::ImagingNarrative,
            date!(2018 - 05 - 29),
            "[mri-1] Near-total resection with thin residual.",
        );
    let port = Arc::new(
        ScriptedCompletionPort::new()
            .on(
                &["Sources disagree"],
                vec![Reply::Text("{\"recheck\": [\"op-1\", \"not-a-record\"]}".to_string())],
            )
            .on(
                &["[op-1]", "Other sources for this event reported"],
                vec![Reply::value("Near-total resection")],
            )
            .answer("[op-1]", "Biopsy only")
            .answer("[mri-1]", "Near-total resection"),
    );
    let extraction = ExtractionConfig {
        review: ReviewConfig {
            enabled: true,
            max_rounds: 1,
        },
        ..ExtractionConfig::default()
    };
    let controller = FallbackController::new(
        AbstractionConfig {
            gold_standard_overrides: GoldStandardPolicy::empty(),
            ..AbstractionConfig::default()
        },
        VariableExtractor::new(port.clone(), extraction.clone()),
        Arc::new(CompletionConflictReviewer::new(
            port.clone(),
            extraction.max_output_tokens,
            Duration::from_millis(extraction.timeout_ms),
        )),
    );
    let event = ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28));

    let abstraction = controller
        .abstract_event(&store, &event, &[extent_of_resection()])
        .await;

    let result = &abstraction.results[0];
    assert_eq!(
        result.final_value,
        FinalValue::Value("Near-total resection".to_string())
    );
    assert_eq!(result.agreement_ratio, 1.0);
    assert!(!result.override_applied);
    assert_eq!(abstraction.extraction_calls, 3);
    // Two extractions, one review, one re-read.
    assert_eq!(port.calls(), 4);
}
