use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BTreeSet},
};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    aggregator::{confidence::confidence_score, overrides::GoldStandardPolicy},
    normalize::normalize_key,
    types::{
        AggregatedResult, CandidateValue, ClinicalEvent, Discrepancy, FinalValue, SourceKind,
    },
};

fn default_low_confidence_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationPolicy {
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default)]
    pub gold_standard: GoldStandardPolicy,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            low_confidence_threshold: default_low_confidence_threshold(),
            gold_standard: GoldStandardPolicy::default(),
        }
    }
}

/// Candidates sharing one normalized value.
#[derive(Debug)]
struct ValueGroup<'a> {
    key: String,
    value: String,
    members: Vec<&'a CandidateValue>,
}

impl ValueGroup<'_> {
    fn best_priority(&self) -> u32 {
        self.members
            .iter()
            .map(|c| c.priority_weight)
            .max()
            .unwrap_or(0)
    }

    fn latest_date(&self) -> Option<Date> {
        self.members.iter().map(|c| c.record_date).max()
    }

    fn record_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .members
            .iter()
            .map(|c| c.source_record_id.as_str())
            .collect();
        ids.into_iter().map(str::to_string).collect()
    }
}

/// Larger group first, then highest source priority, then most recent record, then value.
fn compare_groups(a: &ValueGroup<'_>, b: &ValueGroup<'_>) -> Ordering {
    (a.members.len(), a.best_priority(), a.latest_date(), Reverse(&a.key)).cmp(&(
        b.members.len(),
        b.best_priority(),
        b.latest_date(),
        Reverse(&b.key),
    ))
}

fn group_by_value<'a>(candidates: &[&'a CandidateValue]) -> Vec<ValueGroup<'a>> {
    let mut groups: BTreeMap<String, ValueGroup<'a>> = BTreeMap::new();
    for candidate in candidates {
        let key = normalize_key(&candidate.value);
        groups
            .entry(key.clone())
            .or_insert_with(|| ValueGroup {
                key,
                value: candidate.value.clone(),
                members: Vec::new(),
            })
            .members
            .push(candidate);
    }
    groups.into_values().collect()
}

/// Reconciles the candidates of one (event, variable) into a final value.
///
/// Pure over its inputs: the same frozen candidate set always yields the same result,
/// independent of candidate order.
#[derive(Debug, Clone, Default)]
pub struct EvidenceAggregator {
    policy: AggregationPolicy,
}

impl EvidenceAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    pub fn unavailable(&self, variable_name: &str, candidate_count: usize) -> AggregatedResult {
        AggregatedResult {
            variable_name: variable_name.to_string(),
            final_value: FinalValue::Unavailable,
            confidence: 0.0,
            agreement_ratio: 0.0,
            contributing_sources: BTreeSet::new(),
            override_applied: false,
            override_reason: None,
            low_confidence: true,
            discrepancies: Vec::new(),
            candidate_count,
            stage_reached: None,
        }
    }

    /// Coverage stayed below the minimum after every stage. The value is withheld, but
    /// whatever was extracted is kept as discrepancies for audit.
    pub fn insufficient_coverage(
        &self,
        variable_name: &str,
        candidates: &[CandidateValue],
    ) -> AggregatedResult {
        let ordered: Vec<&CandidateValue> = candidates
            .iter()
            .filter(|c| c.variable_name == variable_name)
            .collect();
        let mut result = self.unavailable(variable_name, ordered.len());
        result.discrepancies = group_by_value(&ordered)
            .iter()
            .map(|group| Discrepancy {
                value: group.value.clone(),
                record_ids: group.record_ids(),
            })
            .collect();
        result
    }

    pub fn aggregate(
        &self,
        event: &ClinicalEvent,
        variable_name: &str,
        candidates: &[CandidateValue],
    ) -> AggregatedResult {
        let mut ordered: Vec<&CandidateValue> = candidates
            .iter()
            .filter(|c| c.variable_name == variable_name)
            .collect();
        ordered.sort_by(|a, b| {
            a.source_record_id
                .cmp(&b.source_record_id)
                .then_with(|| a.value.cmp(&b.value))
                .then_with(|| a.extraction_pass.cmp(&b.extraction_pass))
        });

        if ordered.is_empty() {
            return self.unavailable(variable_name, 0);
        }

        let total = ordered.len();
        let groups = group_by_value(&ordered);
        let Some(modal) = groups.iter().max_by(|a, b| compare_groups(a, b)) else {
            return self.unavailable(variable_name, total);
        };
        let agreement_ratio = modal.members.len() as f64 / total as f64;

        let rule = self
            .policy
            .gold_standard
            .rule_for(variable_name)
            .filter(|rule| rule.applies_to(event));
        let gold_candidates: Vec<&CandidateValue> = match rule {
            Some(rule) => ordered
                .iter()
                .copied()
                .filter(|c| rule.qualifies(event, c))
                .collect(),
            None => Vec::new(),
        };
        let gold_groups = group_by_value(&gold_candidates);
        let gold = gold_groups.iter().max_by(|a, b| compare_groups(a, b));

        let (final_key, final_value, override_reason) = match gold {
            Some(gold) if gold.key != modal.key => {
                let lead = gold.members[0];
                let reason = format!(
                    "{} record {} dated {} ({:+} d from {}) is the gold-standard source for {}; \
                     '{}' overrides modal value '{}' ({} of {} candidates)",
                    lead.source_kind,
                    lead.source_record_id,
                    lead.record_date,
                    event.days_to(lead.record_date),
                    event.event_type,
                    variable_name,
                    gold.value,
                    modal.value,
                    modal.members.len(),
                    total,
                );
                (gold.key.clone(), gold.value.clone(), Some(reason))
            }
            _ => (modal.key.clone(), modal.value.clone(), None),
        };

        let mut high_quality: BTreeSet<SourceKind> = ordered
            .iter()
            .filter(|c| c.source_kind.is_intrinsically_high_quality())
            .map(|c| c.source_kind)
            .collect();
        high_quality.extend(gold_candidates.iter().map(|c| c.source_kind));

        let confidence = confidence_score(agreement_ratio, high_quality.len());
        let discrepancies: Vec<Discrepancy> = groups
            .iter()
            .filter(|group| group.key != final_key)
            .map(|group| Discrepancy {
                value: group.value.clone(),
                record_ids: group.record_ids(),
            })
            .collect();

        let override_applied = override_reason.is_some();
        if let Some(reason) = &override_reason {
            tracing::info!(
                target: "aggregator",
                event_id = %event.event_id,
                variable = %variable_name,
                final_value = %final_value,
                reason = %reason,
                "gold_standard_override_applied"
            );
        }

        let result = AggregatedResult {
            variable_name: variable_name.to_string(),
            final_value: FinalValue::Value(final_value),
            confidence,
            agreement_ratio,
            contributing_sources: ordered
                .iter()
                .map(|c| c.source_record_id.clone())
                .collect(),
            override_applied,
            override_reason,
            low_confidence: confidence < self.policy.low_confidence_threshold,
            discrepancies,
            candidate_count: total,
            stage_reached: None,
        };

        tracing::debug!(
            target: "aggregator",
            event_id = %event.event_id,
            variable = %variable_name,
            final_value = %result.final_value,
            confidence = result.confidence,
            agreement_ratio = result.agreement_ratio,
            candidates = total,
            discrepancies = result.discrepancies.len(),
            "variable_aggregated"
        );
        result
    }
}
