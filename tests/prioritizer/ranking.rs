use time::{Date, macros::date};

use abstractor::{
    prioritizer::{DocumentPrioritizer, TypePriorityTable},
    types::{ClinicalEvent, EventType, EvidenceRecord, RecordContent, SourceKind},
};

fn record(record_id: &str, kind: SourceKind, record_date: Date) -> EvidenceRecord {
    EvidenceRecord {
        record_id: record_id.to_string(),
        patient_id: "p1".to_string(),
        source_kind: kind,
        record_date,
        text_or_value: RecordContent::Document,
        priority_weight: TypePriorityTable::default().priority(kind),
    }
}

fn surgery() -> ClinicalEvent {
    ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28))
}

fn ids(records: &[abstractor::prioritizer::RankedRecord]) -> Vec<&str> {
    records.iter().map(|r| r.record.record_id.as_str()).collect()
}

#[test]
fn given_equal_scores_when_ranking_then_order_is_recent_first_then_record_id() {
    let prioritizer = DocumentPrioritizer::new(TypePriorityTable::default());
    // Days +2 and +5 share the same temporal bucket.
    let records = vec![
        record("op-b", SourceKind::OperativeNote, date!(2018 - 05 - 30)),
        record("op-c", SourceKind::OperativeNote, date!(2018 - 06 - 02)),
        record("op-a", SourceKind::OperativeNote, date!(2018 - 05 - 30)),
    ];
    let mut reversed = records.clone();
    reversed.reverse();

    let first = prioritizer.rank(&surgery(), records, 60.0);
    let second = prioritizer.rank(&surgery(), reversed, 60.0);

    assert_eq!(ids(&first.included), vec!["op-c", "op-a", "op-b"]);
    assert_eq!(first, second);
}

#[test]
fn given_mixed_sources_when_ranking_then_composite_score_orders_them() {
    let prioritizer = DocumentPrioritizer::new(TypePriorityTable::default());
    let records = vec![
        record("pn-1", SourceKind::ProgressNote, date!(2018 - 05 - 28)),
        record("path-1", SourceKind::PathologyReport, date!(2018 - 06 - 08)),
        record("op-1", SourceKind::OperativeNote, date!(2018 - 05 - 28)),
    ];

    let selection = prioritizer.rank(&surgery(), records, 60.0);

    // op 97.5, path 85.0, progress 85.0 (tie broken by the more recent pathology report)
    assert_eq!(ids(&selection.included), vec!["op-1", "path-1", "pn-1"]);
    assert_eq!(selection.included[0].composite, 97.5);
    assert_eq!(selection.included[1].temporal_score, 70);
}

#[test]
fn given_records_below_threshold_when_ranking_then_they_are_excluded_not_dropped() {
    let prioritizer = DocumentPrioritizer::new(TypePriorityTable::default());
    let records = vec![
        record("op-1", SourceKind::OperativeNote, date!(2018 - 05 - 28)),
        record("pn-far", SourceKind::ProgressNote, date!(2018 - 12 - 01)),
    ];

    let selection = prioritizer.rank(&surgery(), records, 60.0);

    assert_eq!(ids(&selection.included), vec!["op-1"]);
    assert_eq!(ids(&selection.excluded), vec!["pn-far"]);
    assert_eq!(selection.excluded[0].composite, 47.5);
}

#[test]
fn given_custom_priorities_when_ranking_then_configured_weights_apply() {
    let priorities = TypePriorityTable::default().with_priority(SourceKind::ProgressNote, 100);
    let prioritizer = DocumentPrioritizer::new(priorities);
    let records = vec![
        record("op-1", SourceKind::OperativeNote, date!(2018 - 05 - 28)),
        record("pn-1", SourceKind::ProgressNote, date!(2018 - 05 - 28)),
    ];

    let selection = prioritizer.rank(&surgery(), records, 60.0);

    assert_eq!(ids(&selection.included), vec!["pn-1", "op-1"]);
}
