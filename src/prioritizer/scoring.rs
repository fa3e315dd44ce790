use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::SourceKind;

/// Static `source_kind -> type_priority` lookup.
///
/// Configured maps may be partial; kinds left out keep their default weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<SourceKind, u32>", into = "BTreeMap<SourceKind, u32>")]
pub struct TypePriorityTable {
    weights: BTreeMap<SourceKind, u32>,
}

impl TypePriorityTable {
    pub fn priority(&self, kind: SourceKind) -> u32 {
        self.weights
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_type_priority(kind))
    }

    pub fn with_priority(mut self, kind: SourceKind, weight: u32) -> Self {
        self.weights.insert(kind, weight);
        self
    }
}

impl Default for TypePriorityTable {
    fn default() -> Self {
        Self {
            weights: SourceKind::all()
                .iter()
                .map(|kind| (*kind, default_type_priority(*kind)))
                .collect(),
        }
    }
}

impl From<BTreeMap<SourceKind, u32>> for TypePriorityTable {
    fn from(overrides: BTreeMap<SourceKind, u32>) -> Self {
        let mut table = Self::default();
        table.weights.extend(overrides);
        table
    }
}

impl From<TypePriorityTable> for BTreeMap<SourceKind, u32> {
    fn from(table: TypePriorityTable) -> Self {
        table.weights
    }
}

pub fn default_type_priority(kind: SourceKind) -> u32 {
    match kind {
        SourceKind::PathologyReport => 100,
        SourceKind::OperativeNote => 95,
        SourceKind::ImagingNarrative => 85,
        SourceKind::DischargeSummary => 75,
        SourceKind::ConsultNote => 72,
        SourceKind::ProgressNote => 70,
        SourceKind::StructuredField => 65,
    }
}

/// Stepwise decay by absolute distance from the event date.
pub fn temporal_proximity_score(days_from_event: i64) -> u32 {
    match days_from_event.unsigned_abs() {
        0..=1 => 100,
        2..=7 => 90,
        8..=30 => 70,
        31..=90 => 50,
        _ => 25,
    }
}

pub fn composite_score(type_priority: u32, temporal_score: u32) -> f64 {
    0.5 * type_priority as f64 + 0.5 * temporal_score as f64
}
