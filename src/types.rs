use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use time::Date;

pub type PatientId = String;
pub type RecordId = String;
pub type EventId = String;
pub type VariableName = String;

/// Sentinel emitted in place of a value when no evidence supports a variable.
pub const UNAVAILABLE: &str = "Unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    OperativeNote,
    PathologyReport,
    ImagingNarrative,
    DischargeSummary,
    ConsultNote,
    ProgressNote,
    StructuredField,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OperativeNote => "operative_note",
            Self::PathologyReport => "pathology_report",
            Self::ImagingNarrative => "imaging_narrative",
            Self::DischargeSummary => "discharge_summary",
            Self::ConsultNote => "consult_note",
            Self::ProgressNote => "progress_note",
            Self::StructuredField => "structured_field",
        }
    }

    pub fn all() -> &'static [SourceKind] {
        &[
            Self::OperativeNote,
            Self::PathologyReport,
            Self::ImagingNarrative,
            Self::DischargeSummary,
            Self::ConsultNote,
            Self::ProgressNote,
            Self::StructuredField,
        ]
    }

    /// Source kinds whose assessments count toward the quality bonus on their own.
    pub fn is_intrinsically_high_quality(&self) -> bool {
        matches!(self, Self::OperativeNote | Self::PathologyReport)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InitialSurgery,
    ProgressiveSurgery,
    Diagnosis,
    TreatmentStart,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialSurgery => "initial_surgery",
            Self::ProgressiveSurgery => "progressive_surgery",
            Self::Diagnosis => "diagnosis",
            Self::TreatmentStart => "treatment_start",
        }
    }

    pub fn is_surgical(&self) -> bool {
        matches!(self, Self::InitialSurgery | Self::ProgressiveSurgery)
    }

    /// Ordering among events that share a date.
    pub fn same_day_rank(&self) -> u8 {
        match self {
            Self::Diagnosis => 0,
            Self::InitialSurgery => 1,
            Self::ProgressiveSurgery => 2,
            Self::TreatmentStart => 3,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalEvent {
    pub event_id: EventId,
    pub event_type: EventType,
    pub event_date: Date,
    pub patient_id: PatientId,
}

impl ClinicalEvent {
    pub fn new(patient_id: impl Into<String>, event_type: EventType, event_date: Date) -> Self {
        let patient_id = patient_id.into();
        Self {
            event_id: format!("{}:{}:{}", patient_id, event_type.as_str(), event_date),
            event_type,
            event_date,
            patient_id,
        }
    }

    /// Signed whole days from the event to `date` (positive = after the event).
    pub fn days_to(&self, date: Date) -> i64 {
        (date - self.event_date).whole_days()
    }
}

/// Inclusive calendar range used to query evidence stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub fn around(anchor: Date, days_before: u32, days_after: u32) -> Self {
        let start = anchor
            .checked_sub(time::Duration::days(days_before as i64))
            .unwrap_or(Date::MIN);
        let end = anchor
            .checked_add(time::Duration::days(days_after as i64))
            .unwrap_or(Date::MAX);
        Self { start, end }
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordContent {
    /// Free-text document; the body is loaded through `fetch_text`.
    Document,
    Structured { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub record_id: RecordId,
    pub patient_id: PatientId,
    pub source_kind: SourceKind,
    pub record_date: Date,
    pub text_or_value: RecordContent,
    pub priority_weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredCategory {
    Procedure,
    Diagnosis,
    Medication,
}

/// Row from the structured procedure / diagnosis / medication tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredEvent {
    pub record_id: RecordId,
    pub patient_id: PatientId,
    pub category: StructuredCategory,
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueEncoding {
    /// Member of the variable's allowed values.
    Vocabulary,
    /// Copied from a structured field.
    StructuredField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateValue {
    pub variable_name: VariableName,
    pub value: String,
    pub encoding: ValueEncoding,
    pub source_record_id: RecordId,
    pub source_kind: SourceKind,
    pub record_date: Date,
    pub priority_weight: u32,
    pub extraction_pass: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FinalValue {
    Value(String),
    Unavailable,
}

impl FinalValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Value(value) => value.as_str(),
            Self::Unavailable => UNAVAILABLE,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for FinalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieval stage of the per-variable fallback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    Primary,
    Secondary,
    Tertiary,
    Exhausted,
}

impl FallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
            Self::Exhausted => "exhausted",
        }
    }

    /// Extraction pass number recorded on candidates (1..=3).
    pub fn pass_number(&self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Tertiary | Self::Exhausted => 3,
        }
    }

    pub fn next(&self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Tertiary,
            Self::Tertiary | Self::Exhausted => Self::Exhausted,
        }
    }
}

impl fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that lost to the final value, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub value: String,
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub variable_name: VariableName,
    pub final_value: FinalValue,
    pub confidence: f64,
    pub agreement_ratio: f64,
    pub contributing_sources: BTreeSet<RecordId>,
    pub override_applied: bool,
    pub override_reason: Option<String>,
    pub low_confidence: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub candidate_count: usize,
    /// Last retrieval stage that ran for this variable; set by the fallback controller.
    #[serde(default)]
    pub stage_reached: Option<FallbackStage>,
}
