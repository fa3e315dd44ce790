use std::cmp::Ordering;

use serde::Serialize;

use crate::{
    evidence::{EvidenceError, EvidenceSourcePort},
    prioritizer::scoring::{TypePriorityTable, composite_score, temporal_proximity_score},
    types::{ClinicalEvent, DateRange, EvidenceRecord, FallbackStage, SourceKind},
    variables::VariableSpec,
};

/// Retrieval parameters for one fallback stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagePlan {
    pub stage: FallbackStage,
    pub days_before: u32,
    pub days_after: u32,
    pub inclusion_threshold: f64,
    pub source_kinds: Vec<SourceKind>,
}

impl StagePlan {
    pub fn window_for(&self, event: &ClinicalEvent) -> DateRange {
        DateRange::around(event.event_date, self.days_before, self.days_after)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRecord {
    pub record: EvidenceRecord,
    pub type_priority: u32,
    pub temporal_score: u32,
    pub composite: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedSelection {
    /// At or above the stage threshold, best first.
    pub included: Vec<RankedRecord>,
    /// Below the threshold; still eligible for wider stages.
    pub excluded: Vec<RankedRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentPrioritizer {
    priorities: TypePriorityTable,
}

impl DocumentPrioritizer {
    pub fn new(priorities: TypePriorityTable) -> Self {
        Self { priorities }
    }

    pub fn priorities(&self) -> &TypePriorityTable {
        &self.priorities
    }

    /// Lists every record of the stage's source kinds inside its window and ranks them.
    pub async fn select(
        &self,
        store: &dyn EvidenceSourcePort,
        event: &ClinicalEvent,
        plan: &StagePlan,
        variables: &[&VariableSpec],
    ) -> Result<RankedSelection, EvidenceError> {
        let window = plan.window_for(event);
        let mut records = Vec::new();
        for kind in &plan.source_kinds {
            if !variables.iter().any(|v| v.accepts_source(*kind)) {
                continue;
            }
            records.extend(
                store
                    .list_records(&event.patient_id, *kind, window)
                    .await?,
            );
        }

        let selection = self.rank(event, records, plan.inclusion_threshold);
        tracing::debug!(
            target: "prioritizer",
            event_id = %event.event_id,
            stage = %plan.stage,
            window_start = %window.start,
            window_end = %window.end,
            included = selection.included.len(),
            excluded = selection.excluded.len(),
            "records_ranked"
        );
        Ok(selection)
    }

    pub fn score(&self, event: &ClinicalEvent, record: EvidenceRecord) -> RankedRecord {
        let type_priority = self.priorities.priority(record.source_kind);
        let temporal_score = temporal_proximity_score(event.days_to(record.record_date));
        RankedRecord {
            composite: composite_score(type_priority, temporal_score),
            record,
            type_priority,
            temporal_score,
        }
    }

    /// Orders by composite score, then more recent date, then record id.
    pub fn rank(
        &self,
        event: &ClinicalEvent,
        records: Vec<EvidenceRecord>,
        inclusion_threshold: f64,
    ) -> RankedSelection {
        let mut ranked: Vec<RankedRecord> = records
            .into_iter()
            .map(|record| self.score(event, record))
            .collect();
        ranked.sort_by(compare_ranked);
        ranked.dedup_by(|a, b| a.record.record_id == b.record.record_id);

        let (included, excluded) = ranked
            .into_iter()
            .partition(|r| r.composite >= inclusion_threshold);
        RankedSelection { included, excluded }
    }
}

fn compare_ranked(a: &RankedRecord, b: &RankedRecord) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| b.record.record_date.cmp(&a.record.record_date))
        .then_with(|| a.record.record_id.cmp(&b.record.record_id))
}
