use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::{
    evidence::{EvidenceError, EvidenceSourcePort},
    extractor::{
        error::ExtractionError,
        ports::{CompletionError, TextCompletionPort, completion_timeout},
        prompts::{build_extraction_prompt, parse_extraction_reply, truncate_text},
    },
    normalize::{ValueNormalizer, is_not_found_marker, normalize_key},
    types::{
        CandidateValue, ClinicalEvent, EvidenceRecord, RecordContent, RecordId, ValueEncoding,
        VariableName,
    },
    variables::VariableSpec,
};

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_tokens() -> u64 {
    128
}

fn default_truncate_ratio() -> f64 {
    0.5
}

fn default_max_concurrent_calls() -> usize {
    4
}

fn default_review_max_rounds() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_review_max_rounds")]
    pub max_rounds: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rounds: default_review_max_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    /// Share of the document kept for the single retry after a timeout.
    #[serde(default = "default_truncate_ratio")]
    pub truncate_ratio: f64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default)]
    pub review: ReviewConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_output_tokens: default_max_output_tokens(),
            truncate_ratio: default_truncate_ratio(),
            max_concurrent_calls: default_max_concurrent_calls(),
            review: ReviewConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The record cannot carry this variable (kind restriction or unrelated field).
    NotApplicable,
    NoAnswer,
    OutsideVocabulary { answer: String },
    Timeout,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Found { candidate: CandidateValue },
    NotFound { reason: NotFoundReason },
}

impl ExtractionOutcome {
    pub fn not_found(reason: NotFoundReason) -> Self {
        Self::NotFound { reason }
    }

    pub fn candidate(&self) -> Option<&CandidateValue> {
        match self {
            Self::Found { candidate } => Some(candidate),
            Self::NotFound { .. } => None,
        }
    }

    pub fn into_candidate(self) -> Option<CandidateValue> {
        match self {
            Self::Found { candidate } => Some(candidate),
            Self::NotFound { .. } => None,
        }
    }
}

/// One (record, variable) extraction; `competing_values` is set on review re-reads.
#[derive(Debug, Clone)]
pub struct ExtractionJob<'a> {
    pub record: &'a EvidenceRecord,
    pub variable: &'a VariableSpec,
    pub competing_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub variable_name: VariableName,
    pub record_id: RecordId,
    pub outcome: ExtractionOutcome,
}

/// Runs single (document, variable) extractions against the completion capability.
#[derive(Clone)]
pub struct VariableExtractor {
    completion: Arc<dyn TextCompletionPort>,
    config: ExtractionConfig,
}

impl VariableExtractor {
    pub fn new(completion: Arc<dyn TextCompletionPort>, config: ExtractionConfig) -> Self {
        Self { completion, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub async fn extract(
        &self,
        store: &dyn EvidenceSourcePort,
        event: &ClinicalEvent,
        record: &EvidenceRecord,
        variable: &VariableSpec,
        pass: u8,
    ) -> ExtractionOutcome {
        let job = ExtractionJob {
            record,
            variable,
            competing_values: Vec::new(),
        };
        let text = match &record.text_or_value {
            RecordContent::Document if variable.accepts_source(record.source_kind) => {
                Some(store.fetch_text(&record.record_id).await)
            }
            _ => None,
        };
        self.run_job(event, &job, pass, text.as_ref()).await
    }

    /// Extracts every job of one document pass, `max_concurrent_calls` at a time.
    ///
    /// Each document body is fetched once and shared across its variables. Results come
    /// back in job order regardless of completion order.
    pub async fn extract_batch(
        &self,
        store: &dyn EvidenceSourcePort,
        event: &ClinicalEvent,
        jobs: &[ExtractionJob<'_>],
        pass: u8,
    ) -> Vec<ExtractionResult> {
        let limit = self.config.max_concurrent_calls.max(1);

        let document_ids: BTreeSet<&str> = jobs
            .iter()
            .filter(|job| {
                matches!(job.record.text_or_value, RecordContent::Document)
                    && job.variable.accepts_source(job.record.source_kind)
            })
            .map(|job| job.record.record_id.as_str())
            .collect();

        // Futures are built eagerly from named fns; a borrowing closure held in the stream
        // would make this future non-`Send` inside a spawned patient worker.
        let fetches: Vec<_> = document_ids
            .into_iter()
            .map(|record_id| fetch_document(store, record_id))
            .collect();
        let texts: HashMap<String, Result<String, EvidenceError>> = stream::iter(fetches)
            .buffer_unordered(limit)
            .collect()
            .await;

        let calls: Vec<_> = jobs
            .iter()
            .enumerate()
            .map(|(index, job)| self.run_indexed(event, index, job, pass, &texts))
            .collect();
        let mut results: Vec<(usize, ExtractionResult)> = stream::iter(calls)
            .buffer_unordered(limit)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn run_indexed(
        &self,
        event: &ClinicalEvent,
        index: usize,
        job: &ExtractionJob<'_>,
        pass: u8,
        texts: &HashMap<String, Result<String, EvidenceError>>,
    ) -> (usize, ExtractionResult) {
        let outcome = self
            .run_job(event, job, pass, texts.get(&job.record.record_id))
            .await;
        let result = ExtractionResult {
            variable_name: job.variable.name.clone(),
            record_id: job.record.record_id.clone(),
            outcome,
        };
        (index, result)
    }

    async fn run_job(
        &self,
        event: &ClinicalEvent,
        job: &ExtractionJob<'_>,
        pass: u8,
        text: Option<&Result<String, EvidenceError>>,
    ) -> ExtractionOutcome {
        let record = job.record;
        let variable = job.variable;
        if !variable.accepts_source(record.source_kind) {
            return ExtractionOutcome::not_found(NotFoundReason::NotApplicable);
        }

        match &record.text_or_value {
            RecordContent::Structured { field, value } => {
                from_structured_field(record, variable, field, value, pass)
            }
            RecordContent::Document => match text {
                Some(Ok(text)) => {
                    self.extract_from_text(event, job, text, pass).await
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        target: "extractor",
                        record_id = %record.record_id,
                        variable = %variable.name,
                        error = %err,
                        "document_fetch_failed"
                    );
                    ExtractionOutcome::not_found(NotFoundReason::Failed {
                        message: err.to_string(),
                    })
                }
                None => ExtractionOutcome::not_found(NotFoundReason::Failed {
                    message: format!("text for record '{}' was not loaded", record.record_id),
                }),
            },
        }
    }

    async fn extract_from_text(
        &self,
        event: &ClinicalEvent,
        job: &ExtractionJob<'_>,
        text: &str,
        pass: u8,
    ) -> ExtractionOutcome {
        let record = job.record;
        let variable = job.variable;

        let reply = match self.complete_with_retry(event, job, text).await {
            Ok(reply) => reply,
            Err(err @ ExtractionError::Timeout { .. }) => {
                tracing::warn!(
                    target: "extractor",
                    record_id = %record.record_id,
                    variable = %variable.name,
                    error = %err,
                    "extraction_timeout"
                );
                return ExtractionOutcome::not_found(NotFoundReason::Timeout);
            }
            Err(err) => {
                tracing::warn!(
                    target: "extractor",
                    record_id = %record.record_id,
                    variable = %variable.name,
                    error = %err,
                    "extraction_failed"
                );
                return ExtractionOutcome::not_found(NotFoundReason::Failed {
                    message: err.to_string(),
                });
            }
        };

        let Some(answer) = parse_extraction_reply(&reply) else {
            return ExtractionOutcome::not_found(NotFoundReason::NoAnswer);
        };
        match ValueNormalizer::for_variable(variable).normalize(&answer) {
            Some(value) => {
                tracing::debug!(
                    target: "extractor",
                    record_id = %record.record_id,
                    variable = %variable.name,
                    value = %value,
                    pass = pass,
                    "candidate_extracted"
                );
                ExtractionOutcome::Found {
                    candidate: candidate_from(
                        record,
                        variable,
                        value,
                        ValueEncoding::Vocabulary,
                        pass,
                    ),
                }
            }
            None => {
                tracing::debug!(
                    target: "extractor",
                    record_id = %record.record_id,
                    variable = %variable.name,
                    answer = %answer,
                    "answer_outside_vocabulary"
                );
                ExtractionOutcome::not_found(NotFoundReason::OutsideVocabulary { answer })
            }
        }
    }

    /// One full-text call; on timeout, exactly one more call with truncated text.
    async fn complete_with_retry(
        &self,
        event: &ClinicalEvent,
        job: &ExtractionJob<'_>,
        text: &str,
    ) -> Result<String, ExtractionError> {
        let timeout = Duration::from_millis(self.config.timeout_ms.max(1));
        let max_tokens = self.config.max_output_tokens.max(1);

        let prompt =
            build_extraction_prompt(job.variable, event, job.record, text, &job.competing_values);
        match self.complete_within(&prompt, max_tokens, timeout).await {
            Ok(reply) => return Ok(reply),
            Err(err) if err.is_timeout() => {}
            Err(err) => return Err(err.into()),
        }

        let truncated = truncate_text(text, self.config.truncate_ratio);
        tracing::info!(
            target: "extractor",
            record_id = %job.record.record_id,
            variable = %job.variable.name,
            original_chars = text.chars().count(),
            retry_chars = truncated.chars().count(),
            "extraction_retry_truncated"
        );
        let prompt = build_extraction_prompt(
            job.variable,
            event,
            job.record,
            truncated,
            &job.competing_values,
        );
        match self.complete_within(&prompt, max_tokens, timeout).await {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_timeout() => Err(ExtractionError::Timeout {
                record_id: job.record.record_id.clone(),
                variable: job.variable.name.clone(),
                attempts: 2,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Bounds the call by `limit` whether or not the port honors its timeout argument.
    async fn complete_within(
        &self,
        prompt: &str,
        max_tokens: u64,
        limit: Duration,
    ) -> Result<String, CompletionError> {
        let call = self.completion.complete(prompt, max_tokens, limit);
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(completion_timeout(format!(
                "no completion within {} ms",
                limit.as_millis()
            )))
        })
    }
}

async fn fetch_document(
    store: &dyn EvidenceSourcePort,
    record_id: &str,
) -> (String, Result<String, EvidenceError>) {
    (record_id.to_string(), store.fetch_text(record_id).await)
}

fn from_structured_field(
    record: &EvidenceRecord,
    variable: &VariableSpec,
    field: &str,
    value: &str,
    pass: u8,
) -> ExtractionOutcome {
    let field_key = normalize_key(field);
    if !variable
        .structured_fields
        .iter()
        .any(|candidate| normalize_key(candidate) == field_key)
    {
        return ExtractionOutcome::not_found(NotFoundReason::NotApplicable);
    }
    if is_not_found_marker(value) {
        return ExtractionOutcome::not_found(NotFoundReason::NoAnswer);
    }

    let candidate = match ValueNormalizer::for_variable(variable).normalize(value) {
        Some(normalized) => {
            candidate_from(record, variable, normalized, ValueEncoding::Vocabulary, pass)
        }
        None => candidate_from(
            record,
            variable,
            value.trim().to_string(),
            ValueEncoding::StructuredField,
            pass,
        ),
    };
    ExtractionOutcome::Found { candidate }
}

fn candidate_from(
    record: &EvidenceRecord,
    variable: &VariableSpec,
    value: String,
    encoding: ValueEncoding,
    pass: u8,
) -> CandidateValue {
    CandidateValue {
        variable_name: variable.name.clone(),
        value,
        encoding,
        source_record_id: record.record_id.clone(),
        source_kind: record.source_kind,
        record_date: record.record_date,
        priority_weight: record.priority_weight,
        extraction_pass: pass,
    }
}
