//! The ingest job state machine's moving parts.
//!
//! `queued → processing → needs_review → applied | failed`. Claiming is a
//! persisted status re-check, so duplicate triggers no-op; processing
//! extracts every source (bounded parallelism, source order preserved),
//! asks the generation collaborator for schema-only JSON, and parks the
//! result as a proposal for human review. Apply and reject are single
//! atomic store operations.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::config::JobLimits;
use crate::extract::DocumentExtractor;
use crate::jobs::{CandidateItem, IngestJob, IngestProposal, IngestSource};
use crate::providers::{GenerationProvider, RefreshNotifier};
use crate::stores::{AppliedProposal, DocumentSource, KnowledgeStore};
use crate::types::{JobError, LoreError, StoreError};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured catalog items from business \
    documents. Respond with a single JSON object and nothing else: no prose, no markdown, \
    no code fences. Schema: {\"items\": [{\"name\": string, \"description\": string|null, \
    \"price_cents\": integer|null, \"currency\": string, \"category\": string|null}]}. \
    Use null for unknown fields. Never invent items that are not in the text.";

#[derive(Debug, Deserialize)]
struct CandidatePayload {
    items: Vec<CandidateItem>,
}

/// What one processing invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Another worker already claimed the job; nothing was done.
    Skipped,
    /// Extraction succeeded and a proposal awaits review.
    NeedsReview { proposal_id: String },
}

/// Submits, processes, and reviews ingest jobs.
pub struct JobRunner {
    store: Arc<dyn KnowledgeStore>,
    extractor: Arc<DocumentExtractor>,
    generator: Arc<dyn GenerationProvider>,
    notifier: Option<Arc<dyn RefreshNotifier>>,
    limits: JobLimits,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        extractor: Arc<DocumentExtractor>,
        generator: Arc<dyn GenerationProvider>,
        limits: JobLimits,
    ) -> Self {
        Self {
            store,
            extractor,
            generator,
            notifier: None,
            limits,
        }
    }

    /// Wire the optional refresh signal sent after a successful apply.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn RefreshNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Submit a job, deduplicating on the idempotency key.
    ///
    /// While a queued/processing/needs_review job exists for the same
    /// (target, kind, sources), that job is returned instead of a new one;
    /// after the previous job reached a terminal state, a fresh job is
    /// created.
    pub async fn submit(
        &self,
        tenant_id: &str,
        target_id: &str,
        kind: &str,
        sources: Vec<IngestSource>,
    ) -> Result<IngestJob, LoreError> {
        if sources.is_empty() {
            return Err(JobError::InvalidInput("no sources provided".into()).into());
        }
        if sources.len() > self.limits.max_sources {
            return Err(JobError::InvalidInput(format!(
                "{} sources exceed the limit of {}",
                sources.len(),
                self.limits.max_sources
            ))
            .into());
        }

        let job = IngestJob::new(tenant_id, target_id, kind, sources);
        if let Some(existing) = self
            .store
            .find_open_job(tenant_id, &job.idempotency_key)
            .await?
        {
            info!(job_id = %existing.id, "reusing open job for idempotency key");
            return Ok(existing);
        }
        self.store.insert_job(&job).await?;
        Ok(job)
    }

    /// Claim and process one queued job.
    ///
    /// A job already out of `queued` yields [`JobOutcome::Skipped`]; a
    /// processing failure marks the job `failed` with the captured error and
    /// propagates, creating no proposal.
    #[instrument(skip(self), fields(tenant_id, job_id))]
    pub async fn process(&self, tenant_id: &str, job_id: &str) -> Result<JobOutcome, LoreError> {
        let job = self
            .store
            .get_job(tenant_id, job_id)
            .await?
            .ok_or(StoreError::NotFound("job"))?;

        if !self.store.claim_job(tenant_id, job_id).await? {
            info!(job_id, "job already claimed, skipping");
            return Ok(JobOutcome::Skipped);
        }

        match self.process_claimed(&job).await {
            Ok(proposal_id) => Ok(JobOutcome::NeedsReview { proposal_id }),
            Err(err) => {
                let structured = err.to_structured();
                if let Err(mark_err) = self.store.fail_job(tenant_id, job_id, &structured).await {
                    warn!(job_id, error = %mark_err, "failed to persist job failure");
                }
                Err(err)
            }
        }
    }

    async fn process_claimed(&self, job: &IngestJob) -> Result<String, LoreError> {
        let extractor = &self.extractor;
        let extractions: Vec<_> = stream::iter(job.sources.iter())
            .map(|source| async move {
                let document_source = DocumentSource::from(source);
                extractor.extract(&document_source).await
            })
            .buffered(self.limits.source_concurrency.max(1))
            .collect()
            .await;

        let mut combined = String::new();
        for (position, extraction) in extractions.into_iter().enumerate() {
            let extracted = extraction.map_err(JobError::from)?;
            if position > 0 {
                combined.push_str("\n\n");
            }
            combined.push_str(&format!("=== Source: {} ===\n", extracted.source_name));
            combined.push_str(&extracted.text);
        }

        let prompt = format!(
            "Extract every '{}' item from the following content.\n\n{combined}",
            job.kind
        );
        let raw = self
            .generator
            .complete(EXTRACTION_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(JobError::from)?;
        let payload = parse_candidate_payload(&raw).map_err(LoreError::from)?;

        let mut warnings = Vec::new();
        if payload.items.is_empty() {
            warnings.push("no items were extracted from the sources".to_string());
        }
        let missing_price = payload
            .items
            .iter()
            .filter(|item| item.price_cents.is_none())
            .count();
        if missing_price > 0 {
            warnings.push(format!("{missing_price} item(s) have no price"));
        }

        let proposal = IngestProposal::new(job, payload.items, warnings);
        self.store
            .complete_job_for_review(&job.tenant_id, &job.id, &proposal)
            .await?;

        info!(
            job_id = %job.id,
            proposal_id = %proposal.id,
            items = proposal.items.len(),
            "job parked for review"
        );
        Ok(proposal.id)
    }

    /// Reviewer accepted: apply the proposal atomically, then fire the
    /// best-effort refresh signal. Signal failure never affects the result.
    pub async fn apply(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<AppliedProposal, LoreError> {
        let proposal = self
            .store
            .get_proposal(tenant_id, proposal_id)
            .await?
            .ok_or(StoreError::NotFound("proposal"))?;
        let job = self
            .store
            .get_job(tenant_id, &proposal.job_id)
            .await?
            .ok_or(StoreError::NotFound("job"))?;

        let applied = self.store.apply_proposal(tenant_id, proposal_id).await?;

        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            let tenant = tenant_id.to_string();
            let target = job.target_id.clone();
            tokio::spawn(async move {
                if let Err(err) = notifier.notify(&tenant, &target).await {
                    warn!(target_id = %target, error = %err, "refresh signal failed");
                }
            });
        }

        Ok(applied)
    }

    /// Reviewer declined: the proposal becomes `rejected` and the job
    /// `failed` with the reviewer's reason.
    pub async fn reject(
        &self,
        tenant_id: &str,
        proposal_id: &str,
        reason: &str,
    ) -> Result<(), LoreError> {
        self.store
            .reject_proposal(tenant_id, proposal_id, reason)
            .await?;
        Ok(())
    }
}

/// Parse the generation collaborator's output under the schema-only-JSON
/// contract. Models wrap output in fences often enough that the parser
/// tolerates leading/trailing junk around the outermost object, but the
/// object itself is parsed strictly.
fn parse_candidate_payload(raw: &str) -> Result<CandidatePayload, JobError> {
    let trimmed = raw.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| JobError::MalformedGeneration("no JSON object in output".into()))?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| JobError::MalformedGeneration("unterminated JSON object".into()))?;
    if end < start {
        return Err(JobError::MalformedGeneration("unterminated JSON object".into()));
    }
    serde_json::from_str(&trimmed[start..=end])
        .map_err(|err| JobError::MalformedGeneration(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_parses() {
        let payload = parse_candidate_payload(
            r#"{"items":[{"name":"Espresso","price_cents":350,"currency":"USD"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].name, "Espresso");
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n{\"items\":[{\"name\":\"Cortado\"}]}\n```";
        let payload = parse_candidate_payload(raw).unwrap();
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].currency, "USD", "default currency applies");
        assert!(payload.items[0].price_cents.is_none());
    }

    #[test]
    fn prose_output_is_rejected() {
        let err = parse_candidate_payload("I could not find any items.").unwrap_err();
        assert!(matches!(err, JobError::MalformedGeneration(_)));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let err = parse_candidate_payload(r#"{"products": []}"#).unwrap_err();
        assert!(matches!(err, JobError::MalformedGeneration(_)));
    }
}
