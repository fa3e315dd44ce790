use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{CandidateValue, ClinicalEvent, EventType, SourceKind, VariableName};

/// Inclusive signed day offsets from the event date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub min: i64,
    pub max: i64,
}

impl DayWindow {
    pub fn contains(&self, offset_days: i64) -> bool {
        self.min <= offset_days && offset_days <= self.max
    }
}

/// One source kind that outranks all others for a variable, inside a window after the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldStandardRule {
    pub source_kind: SourceKind,
    pub window_days: DayWindow,
    /// Event types the rule applies to; empty means every type.
    #[serde(default)]
    pub event_types: Vec<EventType>,
}

impl GoldStandardRule {
    pub fn applies_to(&self, event: &ClinicalEvent) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event.event_type)
    }

    pub fn qualifies(&self, event: &ClinicalEvent, candidate: &CandidateValue) -> bool {
        self.applies_to(event)
            && candidate.source_kind == self.source_kind
            && self.window_days.contains(event.days_to(candidate.record_date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoldStandardPolicy {
    rules: BTreeMap<VariableName, GoldStandardRule>,
}

impl GoldStandardPolicy {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, variable: &str, rule: GoldStandardRule) -> Self {
        self.rules.insert(variable.to_string(), rule);
        self
    }

    pub fn rule_for(&self, variable: &str) -> Option<&GoldStandardRule> {
        self.rules.get(variable)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for GoldStandardPolicy {
    /// Post-operative imaging 24-72 hours after surgery settles extent of resection.
    fn default() -> Self {
        Self::empty().with_rule(
            "extent_of_resection",
            GoldStandardRule {
                source_kind: SourceKind::ImagingNarrative,
                window_days: DayWindow { min: 1, max: 3 },
                event_types: vec![EventType::InitialSurgery, EventType::ProgressiveSurgery],
            },
        )
    }
}
