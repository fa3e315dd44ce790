use std::collections::{BTreeMap, BTreeSet};

use time::macros::date;

use abstractor::{
    formatter::{DataDictionary, FormatError, ResultFormatter, VariableDictionary},
    types::{AggregatedResult, ClinicalEvent, EventType, FallbackStage, FinalValue},
};

const EOR: &str = "extent_of_resection";
const LOCATION: &str = "tumor_location";

fn surgery() -> ClinicalEvent {
    ClinicalEvent::new("p1", EventType::InitialSurgery, date!(2018 - 05 - 28))
}

fn dictionary() -> DataDictionary {
    DataDictionary::default().with_variable(
        EOR,
        VariableDictionary {
            codes: BTreeMap::from([
                ("Gross total resection".to_string(), "1".to_string()),
                ("Near-total resection".to_string(), "2".to_string()),
                ("Biopsy only".to_string(), "5".to_string()),
            ]),
            unavailable_code: Some("9".to_string()),
        },
    )
}

fn result(variable: &str, value: FinalValue) -> AggregatedResult {
    let unavailable = value.is_unavailable();
    AggregatedResult {
        variable_name: variable.to_string(),
        final_value: value,
        confidence: if unavailable { 0.0 } else { 0.9 },
        agreement_ratio: if unavailable { 0.0 } else { 1.0 },
        contributing_sources: if unavailable {
            BTreeSet::new()
        } else {
            BTreeSet::from(["op-1".to_string(), "mri-1".to_string()])
        },
        override_applied: false,
        override_reason: None,
        low_confidence: unavailable,
        discrepancies: Vec::new(),
        candidate_count: if unavailable { 0 } else { 2 },
        stage_reached: Some(FallbackStage::Primary),
    }
}

#[test]
fn given_dictionary_value_when_formatting_then_coded_value_is_emitted() {
    let formatter = ResultFormatter::new(dictionary());
    let event = surgery();

    let (record, errors) = formatter.format(
        &event,
        &[result(EOR, FinalValue::Value("Near-total resection".to_string()))],
    );

    assert!(errors.is_empty());
    assert_eq!(record.event_id, "p1:initial_surgery:2018-05-28");
    assert_eq!(record.patient_id, "p1");
    let variable = &record.variables[EOR];
    assert_eq!(variable.coded_value.as_deref(), Some("2"));
    assert_eq!(variable.raw_value, "Near-total resection");
    assert_eq!(variable.sources, vec!["mri-1".to_string(), "op-1".to_string()]);
    assert_eq!(variable.stage_reached, Some(FallbackStage::Primary));
    assert!(variable.mapping_error.is_none());
}

#[test]
fn given_case_and_punctuation_variant_when_formatting_then_code_still_matches() {
    let formatter = ResultFormatter::new(dictionary());

    let (record, errors) = formatter.format(
        &surgery(),
        &[result(EOR, FinalValue::Value("near total resection".to_string()))],
    );

    assert!(errors.is_empty());
    assert_eq!(record.variables[EOR].coded_value.as_deref(), Some("2"));
}

#[test]
fn given_value_without_code_when_formatting_then_raw_value_passes_through_with_error() {
    let formatter = ResultFormatter::new(dictionary());
    let event = surgery();

    let (record, errors) = formatter.format(
        &event,
        &[
            result(EOR, FinalValue::Value("Laser ablation".to_string())),
            result(LOCATION, FinalValue::Unavailable),
        ],
    );

    assert_eq!(
        errors,
        vec![FormatError::UnmappableValue {
            event_id: event.event_id.clone(),
            variable: EOR.to_string(),
            raw_value: "Laser ablation".to_string(),
        }]
    );
    let variable = &record.variables[EOR];
    assert_eq!(variable.coded_value, None);
    assert_eq!(variable.raw_value, "Laser ablation");
    assert!(variable.mapping_error.is_some());
    assert_eq!(record.variables.len(), 2);
}

#[test]
fn given_unavailable_result_when_formatting_then_unavailable_code_is_used() {
    let formatter = ResultFormatter::new(dictionary());

    let (record, errors) = formatter.format(&surgery(), &[result(EOR, FinalValue::Unavailable)]);

    assert!(errors.is_empty());
    let variable = &record.variables[EOR];
    assert_eq!(variable.coded_value.as_deref(), Some("9"));
    assert_eq!(variable.raw_value, FinalValue::Unavailable.as_str());
    assert!(variable.low_confidence);
    assert!(variable.sources.is_empty());
}

#[test]
fn given_unavailable_without_dictionary_entry_when_formatting_then_no_code_and_no_error() {
    let formatter = ResultFormatter::new(dictionary());

    let (record, errors) =
        formatter.format(&surgery(), &[result(LOCATION, FinalValue::Unavailable)]);

    assert!(errors.is_empty());
    assert_eq!(record.variables[LOCATION].coded_value, None);
}

#[test]
fn given_variable_missing_from_dictionary_when_formatting_value_then_error_is_reported() {
    let formatter = ResultFormatter::new(dictionary());

    let (record, errors) = formatter.format(
        &surgery(),
        &[result(LOCATION, FinalValue::Value("Brain Stem".to_string()))],
    );

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        FormatError::UnmappableValue { variable, .. } if variable == LOCATION
    ));
    assert_eq!(record.variables[LOCATION].raw_value, "Brain Stem");
}

#[test]
fn given_formatted_record_when_serialized_then_optional_fields_are_omitted() {
    let formatter = ResultFormatter::new(dictionary());

    let (record, _) = formatter.format(
        &surgery(),
        &[result(EOR, FinalValue::Value("Biopsy only".to_string()))],
    );
    let json = serde_json::to_value(&record).expect("record should serialize");

    assert_eq!(json["event_type"], "initial_surgery");
    assert_eq!(json["variables"][EOR]["coded_value"], "5");
    assert!(json["variables"][EOR].get("override_reason").is_none());
    assert!(json["variables"][EOR].get("mapping_error").is_none());
}
