use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::{CandidateValue, FallbackStage, RecordId, VariableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    Satisfied,
    CoverageUnmet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTransition {
    pub variable: VariableName,
    pub from: FallbackStage,
    pub to: FallbackStage,
    pub candidates: usize,
}

/// Per-variable fallback state for one event.
#[derive(Debug, Clone)]
pub struct VariableProgress {
    pub variable: VariableName,
    pub stage: FallbackStage,
    pub exhaust_reason: Option<ExhaustReason>,
    /// Last stage whose pass actually ran.
    pub stage_reached: FallbackStage,
    pub history: Vec<FallbackStage>,
    /// One candidate per record; a review re-read replaces the record's entry.
    pub candidates: BTreeMap<RecordId, CandidateValue>,
    /// Records already read for this variable; never read again by a later stage.
    pub attempted: BTreeSet<RecordId>,
}

impl VariableProgress {
    pub fn new(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
            stage: FallbackStage::Primary,
            exhaust_reason: None,
            stage_reached: FallbackStage::Primary,
            history: vec![FallbackStage::Primary],
            candidates: BTreeMap::new(),
            attempted: BTreeSet::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.stage == FallbackStage::Exhausted
    }

    pub fn candidate_values(&self) -> Vec<CandidateValue> {
        self.candidates.values().cloned().collect()
    }

    /// Applies the coverage test after the current stage's pass.
    ///
    /// Coverage met ends the machine. Otherwise it moves exactly one stage wider, and only
    /// a completed tertiary pass can end it under coverage.
    pub fn complete_stage(&mut self, minimum_sources: usize) -> StageTransition {
        let from = self.stage;
        self.stage_reached = from;

        if self.candidates.len() >= minimum_sources {
            self.stage = FallbackStage::Exhausted;
            self.exhaust_reason = Some(ExhaustReason::Satisfied);
        } else if from == FallbackStage::Tertiary {
            self.stage = FallbackStage::Exhausted;
            self.exhaust_reason = Some(ExhaustReason::CoverageUnmet);
        } else {
            self.stage = from.next();
        }
        self.history.push(self.stage);

        StageTransition {
            variable: self.variable.clone(),
            from,
            to: self.stage,
            candidates: self.candidates.len(),
        }
    }
}
