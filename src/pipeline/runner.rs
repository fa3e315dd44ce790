use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    evidence::EvidenceSourcePort,
    fallback::FallbackController,
    formatter::{FormatError, FormattedRecord, ResultFormatter},
    pipeline::error::PipelineError,
    timeline::TimelineBuilder,
    types::PatientId,
    variables::VariableSpec,
};

#[derive(Debug, Clone, Serialize)]
pub struct PatientReport {
    pub patient_id: PatientId,
    pub records: Vec<FormattedRecord>,
    #[serde(skip)]
    pub format_errors: Vec<FormatError>,
    pub events_total: usize,
    pub events_completed: usize,
    pub low_confidence_variables: usize,
    pub overrides_applied: usize,
    pub extraction_calls: usize,
    /// Stopped at an event boundary before every event ran.
    pub cancelled: bool,
}

impl PatientReport {
    pub fn has_low_confidence(&self) -> bool {
        self.low_confidence_variables > 0
    }

    pub fn has_override(&self) -> bool {
        self.overrides_applied > 0
    }
}

/// Processes one patient end-to-end. Events run strictly in timeline order.
pub struct PatientRunner {
    store: Arc<dyn EvidenceSourcePort>,
    timeline: TimelineBuilder,
    controller: Arc<FallbackController>,
    formatter: ResultFormatter,
    variables: Arc<[VariableSpec]>,
}

impl PatientRunner {
    pub fn new(
        store: Arc<dyn EvidenceSourcePort>,
        timeline: TimelineBuilder,
        controller: Arc<FallbackController>,
        formatter: ResultFormatter,
        variables: Vec<VariableSpec>,
    ) -> Self {
        Self {
            store,
            timeline,
            controller,
            formatter,
            variables: variables.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EvidenceSourcePort> {
        &self.store
    }

    #[tracing::instrument(name = "patient_run", target = "pipeline", skip(self, cancel))]
    pub async fn run_patient(
        &self,
        patient_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PatientReport, PipelineError> {
        let events = self
            .timeline
            .build_for_patient(self.store.as_ref(), patient_id)
            .await?;

        let mut report = PatientReport {
            patient_id: patient_id.to_string(),
            records: Vec::with_capacity(events.len()),
            format_errors: Vec::new(),
            events_total: events.len(),
            events_completed: 0,
            low_confidence_variables: 0,
            overrides_applied: 0,
            extraction_calls: 0,
            cancelled: false,
        };

        for event in &events {
            if cancel.is_cancelled() {
                tracing::warn!(
                    target: "pipeline",
                    patient_id = %patient_id,
                    events_completed = report.events_completed,
                    events_total = report.events_total,
                    "patient_run_cancelled"
                );
                if report.events_completed == 0 {
                    return Err(PipelineError::Cancelled {
                        patient_id: patient_id.to_string(),
                    });
                }
                report.cancelled = true;
                break;
            }

            let abstraction = self
                .controller
                .abstract_event(self.store.as_ref(), event, &self.variables)
                .await;
            report.extraction_calls += abstraction.extraction_calls;
            report.low_confidence_variables += abstraction
                .results
                .iter()
                .filter(|r| r.low_confidence)
                .count();
            report.overrides_applied += abstraction
                .results
                .iter()
                .filter(|r| r.override_applied)
                .count();

            let (record, errors) = self.formatter.format(event, &abstraction.results);
            report.records.push(record);
            report.format_errors.extend(errors);
            report.events_completed += 1;
        }

        tracing::info!(
            target: "pipeline",
            patient_id = %patient_id,
            events = report.events_completed,
            low_confidence_variables = report.low_confidence_variables,
            overrides_applied = report.overrides_applied,
            unmappable_values = report.format_errors.len(),
            "patient_run_completed"
        );
        Ok(report)
    }
}
