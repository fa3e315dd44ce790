use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use time::macros::date;

use abstractor::{
    evidence::{EvidenceSourcePort, InMemoryEvidenceStore},
    extractor::{
        CompletionError, ExtractionConfig, ExtractionOutcome, NotFoundReason, TextCompletionPort,
        VariableExtractor,
    },
    prioritizer::TypePriorityTable,
    types::{ClinicalEvent, DateRange, EventType, EvidenceRecord, SourceKind},
};

use crate::support::{Reply, ScriptedCompletionPort, extent_of_resection};

const LONG_NOTE_HEAD: &str = "OPERATIVE NOTE. Near-total debulking of the cerebellar mass.";
const LONG_NOTE_TAIL: &str = "END-OF-DICTATION-MARKER";

fn long_note() -> String {
    let filler = " Hemostasis obtained with bipolar cautery.".repeat(40);
    format!("{LONG_NOTE_HEAD}{filler} {LONG_NOTE_TAIL}")
}

/// Never answers and ignores the deadline it is given.
#[derive(Default)]
struct HangingPort {
    calls: AtomicUsize,
}

#[async_trait]
impl TextCompletionPort for HangingPort {
    async fn complete(
        &self,
        _prompt: &str,
        _max_tokens: u64,
        _timeout: Duration,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

async fn fixture() -> (InMemoryEvidenceStore, ClinicalEvent, EvidenceRecord) {
    let mut store = InMemoryEvidenceStore::new(TypePriorityTable::default());
    store.insert_document(
        "p1",
        "op-1",
        SourceKind::OperativeNote,
        date!(2018 - 05 - 28),
        long_note(),
    );
    let event = ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28));
    let record = store
        .list_records(
            "p1",
            SourceKind::OperativeNote,
            DateRange::around(event.event_date, 0, 0),
        )
        .await
        .expect("patient exists")
        .remove(0);
    (store, event, record)
}

#[tokio::test]
async fn given_first_call_times_out_when_extracting_then_retry_uses_truncated_text() {
    let (store, event, record) = fixture().await;
    let port = Arc::new(ScriptedCompletionPort::new().on(
        &[LONG_NOTE_HEAD],
        vec![Reply::Timeout, Reply::value("near-total debulking")],
    ));
    let extractor = VariableExtractor::new(port.clone(), ExtractionConfig::default());

    let outcome = extractor
        .extract(&store, &event, &record, &extent_of_resection(), 1)
        .await;

    let candidate = outcome.candidate().expect("retry should produce a candidate");
    assert_eq!(candidate.value, "Near-total resection");
    assert_eq!(candidate.source_record_id, "op-1");
    assert_eq!(candidate.extraction_pass, 1);

    let prompts = port.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains(LONG_NOTE_TAIL));
    assert!(!prompts[1].contains(LONG_NOTE_TAIL), "retry must send truncated text");
    assert!(prompts[1].len() < prompts[0].len());
}

#[tokio::test]
async fn given_both_calls_time_out_when_extracting_then_not_found_without_third_call() {
    let (store, event, record) = fixture().await;
    let port =
        Arc::new(ScriptedCompletionPort::new().on(&[LONG_NOTE_HEAD], vec![Reply::Timeout]));
    let extractor = VariableExtractor::new(port.clone(), ExtractionConfig::default());

    let outcome = extractor
        .extract(&store, &event, &record, &extent_of_resection(), 1)
        .await;

    assert_eq!(
        outcome,
        ExtractionOutcome::NotFound {
            reason: NotFoundReason::Timeout
        }
    );
    assert_eq!(port.calls(), 2);
}

#[tokio::test]
async fn given_non_timeout_failure_when_extracting_then_no_retry_is_made() {
    let (store, event, record) = fixture().await;
    let port = Arc::new(ScriptedCompletionPort::new().on(&[LONG_NOTE_HEAD], vec![Reply::Fail]));
    let extractor = VariableExtractor::new(port.clone(), ExtractionConfig::default());

    let outcome = extractor
        .extract(&store, &event, &record, &extent_of_resection(), 1)
        .await;

    assert!(matches!(
        outcome,
        ExtractionOutcome::NotFound {
            reason: NotFoundReason::Failed { .. }
        }
    ));
    assert_eq!(port.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_port_never_answers_when_extracting_then_deadline_ends_both_calls() {
    let (store, event, record) = fixture().await;
    let port = Arc::new(HangingPort::default());
    let config = ExtractionConfig {
        timeout_ms: 50,
        ..ExtractionConfig::default()
    };
    let extractor = VariableExtractor::new(port.clone(), config);

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        extractor.extract(&store, &event, &record, &extent_of_resection(), 1),
    )
    .await
    .expect("extraction should finish once both deadlines pass");

    assert_eq!(
        outcome,
        ExtractionOutcome::NotFound {
            reason: NotFoundReason::Timeout
        }
    );
    assert_eq!(port.calls.load(Ordering::SeqCst), 2);
}
