use std::{collections::HashMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::{
        error::PipelineError,
        runner::{PatientReport, PatientRunner},
    },
    types::PatientId,
};

fn default_concurrency() -> usize {
    4
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./out/abstraction.ndjson")
}

fn default_summary_path() -> PathBuf {
    PathBuf::from("./out/run_summary.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Patients processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            output_path: default_output_path(),
            summary_path: default_summary_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientFailure {
    pub patient_id: PatientId,
    pub reason: String,
    pub insufficient_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub patients_total: usize,
    pub patients_completed: usize,
    pub patients_failed: usize,
    pub patients_cancelled: usize,
    pub low_confidence_patients: usize,
    pub override_patients: usize,
    pub events_abstracted: usize,
    pub unmappable_values: usize,
    pub failures: Vec<PatientFailure>,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Successful (possibly partially cancelled) patients, ordered by patient id.
    pub reports: Vec<PatientReport>,
    pub summary: RunSummary,
}

/// Bounded worker pool: one task per patient, at most `concurrency` running.
pub struct BatchRunner {
    runner: Arc<PatientRunner>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(runner: Arc<PatientRunner>, concurrency: usize) -> Self {
        Self {
            runner,
            concurrency: concurrency.max(1),
        }
    }

    #[tracing::instrument(name = "batch_run", target = "pipeline", skip(self, patients, cancel))]
    pub async fn run(
        &self,
        run_id: &str,
        patients: Vec<PatientId>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut worker_patients = HashMap::new();
        let mut not_started = Vec::new();

        let mut queue = patients.into_iter();
        for patient_id in queue.by_ref() {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    not_started.push(patient_id);
                    break;
                }
            };
            let Ok(permit) = permit else {
                not_started.push(patient_id);
                break;
            };

            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            let tracked_patient = patient_id.clone();
            let handle = workers.spawn(async move {
                let _permit = permit;
                let worker_patient = patient_id.clone();
                let joined = tokio::spawn(async move {
                    runner.run_patient(&worker_patient, &cancel).await
                })
                .await;
                match joined {
                    Ok(outcome) => (patient_id, outcome),
                    Err(err) => lost_worker(patient_id, &err),
                }
            });
            worker_patients.insert(handle.id(), tracked_patient);
        }
        not_started.extend(queue);

        let mut outcomes = Vec::new();
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(err) => {
                    let patient_id = worker_patients.remove(&err.id()).unwrap_or_default();
                    tracing::error!(
                        target: "pipeline",
                        patient_id = %patient_id,
                        error = %err,
                        "patient_worker_join_failed"
                    );
                    outcomes.push(lost_worker(patient_id, &err));
                }
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        let outcome = summarize(run_id, outcomes, not_started);
        tracing::info!(
            target: "pipeline",
            run_id = %run_id,
            patients_total = outcome.summary.patients_total,
            patients_completed = outcome.summary.patients_completed,
            patients_failed = outcome.summary.patients_failed,
            patients_cancelled = outcome.summary.patients_cancelled,
            low_confidence_patients = outcome.summary.low_confidence_patients,
            override_patients = outcome.summary.override_patients,
            "batch_run_completed"
        );
        outcome
    }
}

/// A worker that panicked or was aborted still counts as a failed patient.
fn lost_worker(
    patient_id: PatientId,
    err: &JoinError,
) -> (PatientId, Result<PatientReport, PipelineError>) {
    let failure = PipelineError::WorkerFailed {
        patient_id: patient_id.clone(),
        message: err.to_string(),
    };
    (patient_id, Err(failure))
}

fn summarize(
    run_id: &str,
    outcomes: Vec<(PatientId, Result<PatientReport, PipelineError>)>,
    not_started: Vec<PatientId>,
) -> BatchOutcome {
    let mut summary = RunSummary {
        run_id: run_id.to_string(),
        patients_total: outcomes.len() + not_started.len(),
        patients_cancelled: not_started.len(),
        ..RunSummary::default()
    };
    let mut reports = Vec::new();

    for (patient_id, outcome) in outcomes {
        match outcome {
            Ok(report) => {
                if report.cancelled {
                    summary.patients_cancelled += 1;
                } else {
                    summary.patients_completed += 1;
                }
                if report.has_low_confidence() {
                    summary.low_confidence_patients += 1;
                }
                if report.has_override() {
                    summary.override_patients += 1;
                }
                summary.events_abstracted += report.events_completed;
                summary.unmappable_values += report.format_errors.len();
                reports.push(report);
            }
            Err(PipelineError::Cancelled { .. }) => {
                summary.patients_cancelled += 1;
            }
            Err(err) => {
                tracing::warn!(
                    target: "pipeline",
                    patient_id = %patient_id,
                    error = %err,
                    "patient_run_failed"
                );
                summary.patients_failed += 1;
                summary.failures.push(PatientFailure {
                    patient_id,
                    insufficient_data: err.is_insufficient_data(),
                    reason: err.to_string(),
                });
            }
        }
    }

    BatchOutcome { reports, summary }
}
