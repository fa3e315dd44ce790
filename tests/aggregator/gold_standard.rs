use time::macros::date;

use abstractor::{
    aggregator::{
        AggregationPolicy, DayWindow, EvidenceAggregator, GoldStandardPolicy, GoldStandardRule,
    },
    types::{ClinicalEvent, EventType, FinalValue, SourceKind},
};

use crate::support::{EOR, candidate};

#[test]
fn given_op_note_and_next_day_imaging_disagree_when_aggregating_then_imaging_overrides() {
    let event = ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28));
    let candidates = vec![
        candidate("op-0528", SourceKind::OperativeNote, date!(2018 - 05 - 28), "Biopsy only"),
        candidate(
            "mri-0529",
            SourceKind::ImagingNarrative,
            date!(2018 - 05 - 29),
            "Near-total resection",
        ),
    ];

    let result =
        EvidenceAggregator::new(AggregationPolicy::default()).aggregate(&event, EOR, &candidates);

    assert_eq!(
        result.final_value,
        FinalValue::Value("Near-total resection".to_string())
    );
    assert!(result.override_applied);
    let reason = result.override_reason.expect("override reason should be recorded");
    assert!(reason.contains("mri-0529"), "unexpected reason: {reason}");
    assert!(reason.contains("Biopsy only"), "unexpected reason: {reason}");
    assert_eq!(result.agreement_ratio, 0.5);
    // 0.6 + 0.3 * 0.5 + 0.1 * {operative_note, imaging_narrative}
    assert!((result.confidence - 0.95).abs() < 1e-9);
    assert_eq!(result.discrepancies.len(), 1);
    assert_eq!(result.discrepancies[0].value, "Biopsy only");
}

#[test]
fn given_imaging_outside_window_when_aggregating_then_no_override() {
    let event = ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28));
    let candidates = vec![
        candidate("op-0528", SourceKind::OperativeNote, date!(2018 - 05 - 28), "Biopsy only"),
        candidate("dc-0601", SourceKind::DischargeSummary, date!(2018 - 06 - 01), "Biopsy only"),
        candidate(
            "mri-0610",
            SourceKind::ImagingNarrative,
            date!(2018 - 06 - 10),
            "Near-total resection",
        ),
    ];

    let result =
        EvidenceAggregator::new(AggregationPolicy::default()).aggregate(&event, EOR, &candidates);

    assert_eq!(result.final_value, FinalValue::Value("Biopsy only".to_string()));
    assert!(!result.override_applied);
    assert!(result.override_reason.is_none());
}

#[test]
fn given_non_surgical_event_when_aggregating_then_surgery_rule_does_not_apply() {
    let event = ClinicalEvent::new("p1", EventType::Diagnosis, date!(2018 - 05 - 28));
    let candidates = vec![
        candidate("op-0528", SourceKind::OperativeNote, date!(2018 - 05 - 28), "Biopsy only"),
        candidate(
            "mri-0529",
            SourceKind::ImagingNarrative,
            date!(2018 - 05 - 29),
            "Near-total resection",
        ),
    ];

    let result =
        EvidenceAggregator::new(AggregationPolicy::default()).aggregate(&event, EOR, &candidates);

    assert_eq!(result.final_value, FinalValue::Value("Biopsy only".to_string()));
    assert!(!result.override_applied);
}

#[test]
fn given_gold_source_agrees_with_majority_when_aggregating_then_no_override_is_reported() {
    let event = ClinicalEvent::new("p1", EventType::ProgressiveSurgery, date!(2020 - 02 - 03));
    let candidates = vec![
        candidate("op-1", SourceKind::OperativeNote, date!(2020 - 02 - 03), "Subtotal resection"),
        candidate(
            "mri-1",
            SourceKind::ImagingNarrative,
            date!(2020 - 02 - 05),
            "subtotal resection",
        ),
    ];
    let policy = AggregationPolicy {
        gold_standard: GoldStandardPolicy::empty().with_rule(
            EOR,
            GoldStandardRule {
                source_kind: SourceKind::ImagingNarrative,
                window_days: DayWindow { min: 1, max: 3 },
                event_types: Vec::new(),
            },
        ),
        ..AggregationPolicy::default()
    };

    let result = EvidenceAggregator::new(policy).aggregate(&event, EOR, &candidates);

    assert!(!result.override_applied);
    assert_eq!(result.agreement_ratio, 1.0);
    assert!(result.discrepancies.is_empty());
}
