use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::{
    completion::{
        credentials::EnvCredentialProvider, gateway::CompletionGateway,
        telemetry::{TelemetrySink, TracingTelemetrySink},
    },
    config::Config,
    evidence::{EvidenceSourcePort, JsonDirectoryStore},
    extractor::{TextCompletionPort, VariableExtractor, adapters::GatewayCompletionPort},
    fallback::{
        CompletionConflictReviewer, ConflictReviewPort, FallbackController, NoopConflictReviewer,
    },
    formatter::ResultFormatter,
    pipeline::{
        BatchRunner, PatientRunner, RunSummary,
        output::{write_records_ndjson, write_run_summary},
    },
    timeline::TimelineBuilder,
    types::PatientId,
};

/// Wires the configured store, gateway and pipeline together and runs one batch.
pub async fn run(
    config: Config,
    run_id: &str,
    requested_patients: Vec<PatientId>,
) -> Result<RunSummary> {
    let store = JsonDirectoryStore::open(
        &config.evidence.root,
        config.abstraction.source_type_priority.clone(),
    )
    .await
    .with_context(|| {
        format!(
            "failed to open evidence store {}",
            config.evidence.root.display()
        )
    })?;
    let store: Arc<dyn EvidenceSourcePort> = Arc::new(store);

    let patients = if requested_patients.is_empty() {
        store
            .list_patients()
            .await
            .context("failed to list patients in evidence store")?
    } else {
        requested_patients
    };
    if patients.is_empty() {
        return Err(anyhow!("no patients to abstract"));
    }

    let telemetry = Arc::new(TracingTelemetrySink::default());
    let gateway = CompletionGateway::new(
        config.completion.clone(),
        Arc::new(EnvCredentialProvider),
        Arc::clone(&telemetry) as Arc<dyn TelemetrySink>,
    )
    .map_err(|err| anyhow!("failed to build completion gateway: {err}"))?;
    let gateway = Arc::new(gateway);

    let extraction_port: Arc<dyn TextCompletionPort> =
        Arc::new(GatewayCompletionPort::new(Arc::clone(&gateway), None, None));
    let reviewer: Arc<dyn ConflictReviewPort> = if config.extraction.review.enabled {
        let review_port: Arc<dyn TextCompletionPort> = Arc::new(
            GatewayCompletionPort::new(Arc::clone(&gateway), None, None).with_purpose("review"),
        );
        Arc::new(CompletionConflictReviewer::new(
            review_port,
            config.extraction.max_output_tokens,
            Duration::from_millis(config.extraction.timeout_ms),
        ))
    } else {
        Arc::new(NoopConflictReviewer)
    };

    let extractor = VariableExtractor::new(extraction_port, config.extraction.clone());
    let controller = Arc::new(FallbackController::new(
        config.abstraction.clone(),
        extractor,
        reviewer,
    ));
    let runner = Arc::new(PatientRunner::new(
        store,
        TimelineBuilder::new(config.timeline.clone()),
        controller,
        ResultFormatter::new(config.dictionary.clone()),
        config.variables.clone(),
    ));
    let batch = BatchRunner::new(runner, config.pipeline.concurrency);

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn(cancel_on_signal(cancel.clone()));

    eprintln!(
        "abstractor run {run_id}: {} patient(s), {} variable(s), concurrency {}",
        patients.len(),
        config.variables.len(),
        config.pipeline.concurrency
    );
    let outcome = batch.run(run_id, patients, cancel.clone()).await;
    signal_task.abort();

    let written = write_records_ndjson(&config.pipeline.output_path, &outcome.reports).await?;
    write_run_summary(&config.pipeline.summary_path, &outcome.summary).await?;

    let totals = telemetry.totals();
    tracing::info!(
        target: "pipeline",
        run_id = %run_id,
        requests = totals.requests,
        completed = totals.completed,
        failed = totals.failed,
        failed_attempts = totals.failed_attempts,
        output_tokens = totals.output_tokens,
        "completion_totals"
    );

    if cancel.is_cancelled() {
        eprintln!("abstractor stopped early: received shutdown signal");
    }
    eprintln!(
        "abstractor wrote {written} record(s) to {}; summary at {}",
        config.pipeline.output_path.display(),
        config.pipeline.summary_path.display()
    );
    Ok(outcome.summary)
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(target: "pipeline", error = %err, "signal_listener_unavailable");
            return;
        }
    };

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::warn!(target: "pipeline", signal = signal_name, "shutdown_requested");
    eprintln!("abstractor received {signal_name}; finishing in-flight events");
    cancel.cancel();
}
