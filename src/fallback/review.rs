use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    extractor::{
        ports::{CompletionError, TextCompletionPort},
        prompts::{build_review_prompt, parse_review_reply},
    },
    types::{CandidateValue, ClinicalEvent, RecordId},
    variables::VariableSpec,
};

#[derive(Debug, Clone)]
pub struct ConflictReviewRequest {
    pub event: ClinicalEvent,
    pub variable: VariableSpec,
    pub candidates: Vec<CandidateValue>,
}

/// Second reasoning capability that names conflicting records worth re-reading.
#[async_trait]
pub trait ConflictReviewPort: Send + Sync {
    async fn review(&self, req: ConflictReviewRequest) -> Result<Vec<RecordId>, CompletionError>;
}

#[derive(Default)]
pub struct NoopConflictReviewer;

#[async_trait]
impl ConflictReviewPort for NoopConflictReviewer {
    async fn review(&self, _req: ConflictReviewRequest) -> Result<Vec<RecordId>, CompletionError> {
        Ok(Vec::new())
    }
}

pub struct CompletionConflictReviewer {
    completion: Arc<dyn TextCompletionPort>,
    max_tokens: u64,
    timeout: Duration,
}

impl CompletionConflictReviewer {
    pub fn new(
        completion: Arc<dyn TextCompletionPort>,
        max_tokens: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            completion,
            max_tokens,
            timeout,
        }
    }
}

#[async_trait]
impl ConflictReviewPort for CompletionConflictReviewer {
    async fn review(&self, req: ConflictReviewRequest) -> Result<Vec<RecordId>, CompletionError> {
        let prompt = build_review_prompt(&req.variable, &req.event, &req.candidates);
        let reply = self
            .completion
            .complete(&prompt, self.max_tokens, self.timeout)
            .await?;

        // Only records that actually produced a candidate can be re-read.
        Ok(parse_review_reply(&reply)
            .into_iter()
            .filter(|id| req.candidates.iter().any(|c| &c.source_record_id == id))
            .collect())
    }
}
