use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    evidence::EvidenceSourcePort,
    timeline::error::TimelineError,
    types::{ClinicalEvent, EventType, StructuredCategory, StructuredEvent},
};

fn default_resection_codes() -> BTreeSet<String> {
    [
        "61500", "61510", "61512", "61518", "61519", "61520", "61521", "61524", "61526", "61545",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_biopsy_codes() -> BTreeSet<String> {
    ["61140", "61750", "61751", "61781"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_same_episode_days() -> i64 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_resection_codes")]
    pub resection_codes: BTreeSet<String>,
    #[serde(default = "default_biopsy_codes")]
    pub biopsy_codes: BTreeSet<String>,
    #[serde(default)]
    pub other_surgical_codes: BTreeSet<String>,
    #[serde(default = "default_same_episode_days")]
    pub same_episode_days: i64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            resection_codes: default_resection_codes(),
            biopsy_codes: default_biopsy_codes(),
            other_surgical_codes: BTreeSet::new(),
            same_episode_days: default_same_episode_days(),
        }
    }
}

#[derive(Debug, Clone)]
struct SurgicalEpisode {
    date: Date,
    codes: BTreeSet<String>,
}

/// Turns structured procedure, diagnosis and medication rows into ordered clinical events.
#[derive(Debug, Clone, Default)]
pub struct TimelineBuilder {
    config: TimelineConfig,
}

impl TimelineBuilder {
    pub fn new(config: TimelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Whether a procedure code appears in any of the surgical code tables.
    pub fn is_surgical_code(&self, code: &str) -> bool {
        let code = code.trim();
        [
            &self.config.resection_codes,
            &self.config.biopsy_codes,
            &self.config.other_surgical_codes,
        ]
        .into_iter()
        .any(|table| table.contains(code))
    }

    #[tracing::instrument(name = "timeline_build", target = "timeline", skip(self, store))]
    pub async fn build_for_patient(
        &self,
        store: &dyn EvidenceSourcePort,
        patient_id: &str,
    ) -> Result<Vec<ClinicalEvent>, TimelineError> {
        let rows = store.list_structured_events(patient_id).await?;
        self.build(patient_id, &rows)
    }

    pub fn build(
        &self,
        patient_id: &str,
        rows: &[StructuredEvent],
    ) -> Result<Vec<ClinicalEvent>, TimelineError> {
        let rows: Vec<&StructuredEvent> = rows
            .iter()
            .filter(|row| row.patient_id == patient_id)
            .collect();

        let mut events = Vec::new();
        for episode in self.surgical_episodes(&rows) {
            events.push(ClinicalEvent::new(patient_id, episode.0, episode.1));
        }
        let surgical_count = events.len();

        for date in first_dates_by_code(&rows, StructuredCategory::Diagnosis) {
            events.push(ClinicalEvent::new(patient_id, EventType::Diagnosis, date));
        }
        let diagnostic_count = events.len() - surgical_count;

        if surgical_count == 0 && diagnostic_count == 0 {
            tracing::warn!(
                target: "timeline",
                patient_id = %patient_id,
                structured_rows = rows.len(),
                "timeline_insufficient_data"
            );
            return Err(TimelineError::InsufficientData {
                patient_id: patient_id.to_string(),
            });
        }

        for date in first_dates_by_code(&rows, StructuredCategory::Medication) {
            events.push(ClinicalEvent::new(patient_id, EventType::TreatmentStart, date));
        }

        events.sort_by(|a, b| {
            a.event_date
                .cmp(&b.event_date)
                .then_with(|| a.event_type.same_day_rank().cmp(&b.event_type.same_day_rank()))
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        events.dedup_by(|a, b| a.event_id == b.event_id);

        tracing::info!(
            target: "timeline",
            patient_id = %patient_id,
            events = events.len(),
            surgical = surgical_count,
            diagnostic = diagnostic_count,
            "timeline_built"
        );
        Ok(events)
    }

    /// First episode is the initial surgery. A later episode counts as progressive when its
    /// code set changed or it falls outside `same_episode_days`; otherwise it is folded in.
    fn surgical_episodes(&self, rows: &[&StructuredEvent]) -> Vec<(EventType, Date)> {
        let mut by_date: BTreeMap<Date, BTreeSet<String>> = BTreeMap::new();
        for row in rows {
            if row.category != StructuredCategory::Procedure {
                continue;
            }
            if !self.is_surgical_code(&row.code) {
                continue;
            }
            by_date
                .entry(row.date)
                .or_default()
                .insert(row.code.trim().to_string());
        }

        let mut episodes: Vec<SurgicalEpisode> = Vec::new();
        let mut output = Vec::new();
        for (date, codes) in by_date {
            let Some(previous) = episodes.last() else {
                episodes.push(SurgicalEpisode { date, codes });
                output.push((EventType::InitialSurgery, date));
                continue;
            };

            let gap_days = (date - previous.date).whole_days();
            if codes != previous.codes || gap_days > self.config.same_episode_days {
                episodes.push(SurgicalEpisode { date, codes });
                output.push((EventType::ProgressiveSurgery, date));
            } else {
                tracing::debug!(
                    target: "timeline",
                    folded_date = %date,
                    episode_date = %previous.date,
                    "surgical_episode_folded"
                );
            }
        }
        output
    }
}

/// Distinct first-occurrence dates, taking the earliest date per code.
fn first_dates_by_code(rows: &[&StructuredEvent], category: StructuredCategory) -> BTreeSet<Date> {
    let mut first_by_code: BTreeMap<&str, Date> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.category == category) {
        first_by_code
            .entry(row.code.trim())
            .and_modify(|date| {
                if row.date < *date {
                    *date = row.date;
                }
            })
            .or_insert(row.date);
    }
    first_by_code.into_values().collect()
}
