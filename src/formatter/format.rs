use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    formatter::{dictionary::DataDictionary, error::FormatError},
    types::{
        AggregatedResult, ClinicalEvent, EventId, EventType, FallbackStage, FinalValue, PatientId,
        RecordId, VariableName,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedVariable {
    /// `None` when the value has no code (see `mapping_error`) or is unavailable without one.
    pub coded_value: Option<String>,
    pub raw_value: String,
    pub confidence: f64,
    pub agreement_ratio: f64,
    pub sources: Vec<RecordId>,
    pub override_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_reached: Option<FallbackStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_error: Option<String>,
}

/// One output row per (patient, event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedRecord {
    pub patient_id: PatientId,
    pub event_id: EventId,
    pub event_type: EventType,
    pub event_date: Date,
    pub variables: BTreeMap<VariableName, FormattedVariable>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultFormatter {
    dictionary: DataDictionary,
}

impl ResultFormatter {
    pub fn new(dictionary: DataDictionary) -> Self {
        Self { dictionary }
    }

    /// Unmappable values are returned as errors next to the record, never instead of it.
    pub fn format(
        &self,
        event: &ClinicalEvent,
        results: &[AggregatedResult],
    ) -> (FormattedRecord, Vec<FormatError>) {
        let mut variables = BTreeMap::new();
        let mut errors = Vec::new();

        for result in results {
            let (coded_value, error) = self.code_for(event, result);
            if let Some(err) = &error {
                tracing::warn!(
                    target: "formatter",
                    event_id = %event.event_id,
                    variable = %result.variable_name,
                    raw_value = %result.final_value,
                    error = %err,
                    "unmappable_value"
                );
            }

            variables.insert(
                result.variable_name.clone(),
                FormattedVariable {
                    coded_value,
                    raw_value: result.final_value.as_str().to_string(),
                    confidence: result.confidence,
                    agreement_ratio: result.agreement_ratio,
                    sources: result.contributing_sources.iter().cloned().collect(),
                    override_applied: result.override_applied,
                    override_reason: result.override_reason.clone(),
                    low_confidence: result.low_confidence,
                    stage_reached: result.stage_reached,
                    mapping_error: error.as_ref().map(ToString::to_string),
                },
            );
            errors.extend(error);
        }

        (
            FormattedRecord {
                patient_id: event.patient_id.clone(),
                event_id: event.event_id.clone(),
                event_type: event.event_type,
                event_date: event.event_date,
                variables,
            },
            errors,
        )
    }

    fn code_for(
        &self,
        event: &ClinicalEvent,
        result: &AggregatedResult,
    ) -> (Option<String>, Option<FormatError>) {
        let entry = self.dictionary.variable(&result.variable_name);
        match &result.final_value {
            FinalValue::Unavailable => (
                entry.and_then(|e| e.unavailable_code.clone()),
                None,
            ),
            FinalValue::Value(value) => match entry.and_then(|e| e.code_for(value)) {
                Some(code) => (Some(code.to_string()), None),
                None => (
                    None,
                    Some(FormatError::UnmappableValue {
                        event_id: event.event_id.clone(),
                        variable: result.variable_name.clone(),
                        raw_value: value.clone(),
                    }),
                ),
            },
        }
    }
}
