use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use serde::Serialize;

use crate::{
    aggregator::EvidenceAggregator,
    evidence::EvidenceSourcePort,
    extractor::{ExtractionJob, ReviewConfig, VariableExtractor},
    fallback::{
        policy::AbstractionConfig,
        review::{ConflictReviewPort, ConflictReviewRequest},
        state::{ExhaustReason, StageTransition, VariableProgress},
    },
    normalize::normalize_key,
    prioritizer::{DocumentPrioritizer, RankedSelection},
    types::{AggregatedResult, ClinicalEvent, EvidenceRecord, FallbackStage, RecordId},
    variables::VariableSpec,
};

const STAGES: [FallbackStage; 3] = [
    FallbackStage::Primary,
    FallbackStage::Secondary,
    FallbackStage::Tertiary,
];

#[derive(Debug, Clone, Serialize)]
pub struct EventAbstraction {
    pub event: ClinicalEvent,
    pub results: Vec<AggregatedResult>,
    pub transitions: Vec<StageTransition>,
    pub extraction_calls: usize,
}

/// Drives the staged widening for every variable of one event, then aggregates.
pub struct FallbackController {
    config: AbstractionConfig,
    prioritizer: DocumentPrioritizer,
    extractor: VariableExtractor,
    aggregator: EvidenceAggregator,
    reviewer: Arc<dyn ConflictReviewPort>,
    review: ReviewConfig,
}

impl FallbackController {
    pub fn new(
        config: AbstractionConfig,
        extractor: VariableExtractor,
        reviewer: Arc<dyn ConflictReviewPort>,
    ) -> Self {
        let review = extractor.config().review.clone();
        Self {
            prioritizer: DocumentPrioritizer::new(config.source_type_priority.clone()),
            aggregator: EvidenceAggregator::new(config.aggregation_policy()),
            config,
            extractor,
            reviewer,
            review,
        }
    }

    pub fn config(&self) -> &AbstractionConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &EvidenceAggregator {
        &self.aggregator
    }

    #[tracing::instrument(
        name = "abstract_event",
        target = "fallback",
        skip_all,
        fields(event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn abstract_event(
        &self,
        store: &dyn EvidenceSourcePort,
        event: &ClinicalEvent,
        variables: &[VariableSpec],
    ) -> EventAbstraction {
        let mut progress: Vec<VariableProgress> = variables
            .iter()
            .map(|spec| VariableProgress::new(&spec.name))
            .collect();
        let mut seen_records: HashMap<RecordId, EvidenceRecord> = HashMap::new();
        let mut transitions = Vec::new();
        let mut extraction_calls = 0;

        for stage in STAGES {
            let active: Vec<usize> = progress
                .iter()
                .enumerate()
                .filter(|(_, p)| p.stage == stage)
                .map(|(index, _)| index)
                .collect();
            if active.is_empty() {
                break;
            }
            let Some(plan) = self.config.plan_for(stage) else {
                break;
            };

            let active_specs: Vec<&VariableSpec> = active.iter().map(|i| &variables[*i]).collect();
            let selection = match self
                .prioritizer
                .select(store, event, &plan, &active_specs)
                .await
            {
                Ok(selection) => selection,
                Err(err) => {
                    tracing::warn!(
                        target: "fallback",
                        event_id = %event.event_id,
                        stage = %stage,
                        error = %err,
                        "record_listing_failed"
                    );
                    RankedSelection::default()
                }
            };
            for ranked in &selection.included {
                seen_records
                    .entry(ranked.record.record_id.clone())
                    .or_insert_with(|| ranked.record.clone());
            }

            let mut jobs = Vec::new();
            for ranked in &selection.included {
                for index in &active {
                    let spec = &variables[*index];
                    if !spec.accepts_source(ranked.record.source_kind) {
                        continue;
                    }
                    if !progress[*index]
                        .attempted
                        .insert(ranked.record.record_id.clone())
                    {
                        continue;
                    }
                    jobs.push(ExtractionJob {
                        record: &ranked.record,
                        variable: spec,
                        competing_values: Vec::new(),
                    });
                }
            }

            extraction_calls += jobs.len();
            let results = self
                .extractor
                .extract_batch(store, event, &jobs, stage.pass_number())
                .await;
            for result in results {
                let Some(candidate) = result.outcome.into_candidate() else {
                    continue;
                };
                if let Some(p) = progress.iter_mut().find(|p| p.variable == result.variable_name) {
                    p.candidates.insert(result.record_id, candidate);
                }
            }

            if self.review.enabled {
                extraction_calls += self
                    .review_conflicts(
                        store,
                        event,
                        variables,
                        &mut progress,
                        &active,
                        &seen_records,
                        stage,
                    )
                    .await;
            }

            for index in &active {
                let transition = progress[*index].complete_stage(self.config.minimum_sources);
                if transition.to == FallbackStage::Exhausted {
                    tracing::debug!(
                        target: "fallback",
                        event_id = %event.event_id,
                        variable = %transition.variable,
                        from = %transition.from,
                        candidates = transition.candidates,
                        reason = ?progress[*index].exhaust_reason,
                        "fallback_exhausted"
                    );
                } else {
                    tracing::info!(
                        target: "fallback",
                        event_id = %event.event_id,
                        variable = %transition.variable,
                        from = %transition.from,
                        to = %transition.to,
                        candidates = transition.candidates,
                        minimum_sources = self.config.minimum_sources,
                        "fallback_stage_advanced"
                    );
                }
                transitions.push(transition);
            }
        }

        let results = variables
            .iter()
            .zip(progress.iter())
            .map(|(spec, p)| self.finalize(event, spec, p))
            .collect();

        EventAbstraction {
            event: event.clone(),
            results,
            transitions,
            extraction_calls,
        }
    }

    fn finalize(
        &self,
        event: &ClinicalEvent,
        spec: &VariableSpec,
        progress: &VariableProgress,
    ) -> AggregatedResult {
        let candidates = progress.candidate_values();
        let mut result = match progress.exhaust_reason {
            Some(ExhaustReason::CoverageUnmet) if !self.config.allow_partial_coverage => {
                tracing::info!(
                    target: "fallback",
                    event_id = %event.event_id,
                    variable = %spec.name,
                    candidates = candidates.len(),
                    minimum_sources = self.config.minimum_sources,
                    "variable_unavailable"
                );
                self.aggregator.insufficient_coverage(&spec.name, &candidates)
            }
            _ => self.aggregator.aggregate(event, &spec.name, &candidates),
        };
        result.stage_reached = Some(progress.stage_reached);
        result
    }

    /// Asks the reviewer about variables whose candidates disagree and re-reads the records
    /// it names. Returns the number of re-extraction calls issued.
    #[allow(clippy::too_many_arguments)]
    async fn review_conflicts(
        &self,
        store: &dyn EvidenceSourcePort,
        event: &ClinicalEvent,
        variables: &[VariableSpec],
        progress: &mut [VariableProgress],
        active: &[usize],
        seen_records: &HashMap<RecordId, EvidenceRecord>,
        stage: FallbackStage,
    ) -> usize {
        let mut calls = 0;
        for round in 0..self.review.max_rounds {
            let mut jobs = Vec::new();
            for index in active {
                let spec = &variables[*index];
                let candidates = progress[*index].candidate_values();
                let distinct: BTreeSet<String> =
                    candidates.iter().map(|c| normalize_key(&c.value)).collect();
                if distinct.len() < 2 {
                    continue;
                }

                let request = ConflictReviewRequest {
                    event: event.clone(),
                    variable: spec.clone(),
                    candidates: candidates.clone(),
                };
                let recheck = match self.reviewer.review(request).await {
                    Ok(recheck) => recheck,
                    Err(err) => {
                        tracing::warn!(
                            target: "fallback",
                            event_id = %event.event_id,
                            variable = %spec.name,
                            error = %err,
                            "conflict_review_failed"
                        );
                        continue;
                    }
                };

                for record_id in recheck {
                    let Some(record) = seen_records.get(&record_id) else {
                        continue;
                    };
                    let Some(own) = progress[*index].candidates.get(&record_id) else {
                        continue;
                    };
                    let own_key = normalize_key(&own.value);
                    let mut competing_values: Vec<String> = candidates
                        .iter()
                        .filter(|c| normalize_key(&c.value) != own_key)
                        .map(|c| c.value.clone())
                        .collect();
                    competing_values.sort();
                    competing_values.dedup();
                    jobs.push(ExtractionJob {
                        record,
                        variable: spec,
                        competing_values,
                    });
                }
            }

            if jobs.is_empty() {
                break;
            }
            calls += jobs.len();
            tracing::info!(
                target: "fallback",
                event_id = %event.event_id,
                stage = %stage,
                round = round,
                rechecks = jobs.len(),
                "conflict_review_reextracting"
            );

            let results = self
                .extractor
                .extract_batch(store, event, &jobs, stage.pass_number())
                .await;
            for result in results {
                let Some(candidate) = result.outcome.into_candidate() else {
                    continue;
                };
                if let Some(p) = progress.iter_mut().find(|p| p.variable == result.variable_name) {
                    p.candidates.insert(result.record_id, candidate);
                }
            }
        }
        calls
    }
}
