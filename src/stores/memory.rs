//! In-memory store: brute-force vector search, test backend, and the
//! reference for transition semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    AppliedProposal, ChunkRecord, ChunkStatus, DocumentStatus, KnowledgeDocument, KnowledgeStore,
    RetrievedChunk,
};
use crate::jobs::{CandidateItem, IngestJob, IngestProposal, JobStatus, ProposalStatus};
use crate::types::{StoreError, StructuredError};

/// An item row in a tenant's target collection.
#[derive(Debug, Clone)]
pub struct TargetItem {
    pub id: String,
    pub tenant_id: String,
    pub target_id: String,
    pub kind: String,
    pub item: CandidateItem,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, KnowledgeDocument>,
    chunks: HashMap<String, ChunkRecord>,
    jobs: HashMap<String, IngestJob>,
    proposals: HashMap<String, IngestProposal>,
    items: HashMap<String, TargetItem>,
}

/// Thread-safe in-memory [`KnowledgeStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of applied target items, for assertions.
    pub fn target_items(&self) -> Vec<TargetItem> {
        self.inner.read().items.values().cloned().collect()
    }

    /// Snapshot of one chunk, for assertions.
    pub fn chunk(&self, content_hash: &str) -> Option<ChunkRecord> {
        self.inner.read().chunks.get(content_hash).cloned()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn insert_document(&self, document: &KnowledgeDocument) -> Result<(), StoreError> {
        self.inner
            .write()
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<KnowledgeDocument>, StoreError> {
        Ok(self
            .inner
            .read()
            .documents
            .get(document_id)
            .filter(|doc| doc.tenant_id == tenant_id)
            .cloned())
    }

    async fn finalize_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        chunk_count: u32,
        content_hash: &str,
        page_count: Option<u32>,
        mime_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let doc = inner
            .documents
            .get_mut(document_id)
            .filter(|doc| doc.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound("document"))?;
        if doc.status == DocumentStatus::Disabled {
            return Err(StoreError::Conflict(
                "cannot finalize a disabled document".into(),
            ));
        }
        doc.status = DocumentStatus::Active;
        doc.chunk_count = chunk_count;
        doc.content_hash = Some(content_hash.to_string());
        doc.page_count = page_count;
        doc.mime_type = mime_type.map(str::to_string);
        doc.error = None;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let doc = inner
            .documents
            .get_mut(document_id)
            .filter(|doc| doc.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound("document"))?;
        if doc.status == DocumentStatus::Disabled {
            return Err(StoreError::Conflict(
                "cannot fail a disabled document".into(),
            ));
        }
        doc.status = DocumentStatus::Failed;
        doc.error = Some(error.clone());
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn set_document_enabled(
        &self,
        tenant_id: &str,
        document_id: &str,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let doc = inner
            .documents
            .get_mut(document_id)
            .filter(|doc| doc.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound("document"))?;
        if !matches!(doc.status, DocumentStatus::Active | DocumentStatus::Disabled) {
            return Err(StoreError::Conflict(format!(
                "cannot toggle a document in '{}'",
                doc.status.as_str()
            )));
        }
        doc.status = if enabled {
            DocumentStatus::Active
        } else {
            DocumentStatus::Disabled
        };
        doc.updated_at = Utc::now();

        let chunk_status = if enabled {
            ChunkStatus::Active
        } else {
            ChunkStatus::Disabled
        };
        for chunk in inner.chunks.values_mut() {
            if chunk.document_id == document_id {
                chunk.status = chunk_status;
            }
        }
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for chunk in chunks {
            inner
                .chunks
                .insert(chunk.content_hash.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn prune_document_chunks(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.chunks.len();
        inner.chunks.retain(|hash, chunk| {
            chunk.document_id != document_id || keep.iter().any(|k| k == hash)
        });
        Ok(before - inner.chunks.len())
    }

    async fn active_chunk_count(
        &self,
        tenant_id: &str,
        exclude_document: Option<&str>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .chunks
            .values()
            .filter(|chunk| {
                chunk.tenant_id == tenant_id
                    && chunk.status == ChunkStatus::Active
                    && exclude_document != Some(chunk.document_id.as_str())
            })
            .count() as u64)
    }

    async fn search_chunks(
        &self,
        tenant_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        let inner = self.inner.read();
        let mut hits: Vec<RetrievedChunk> = inner
            .chunks
            .values()
            .filter(|chunk| chunk.tenant_id == tenant_id && chunk.status == ChunkStatus::Active)
            .filter_map(|chunk| {
                let doc = inner.documents.get(&chunk.document_id)?;
                if doc.status != DocumentStatus::Active {
                    return None;
                }
                Some(RetrievedChunk {
                    content_hash: chunk.content_hash.clone(),
                    document_id: chunk.document_id.clone(),
                    source_name: doc.source.source_name(),
                    content: chunk.content.clone(),
                    distance: cosine_distance(&chunk.embedding, query),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn insert_job(&self, job: &IngestJob) -> Result<(), StoreError> {
        self.inner.write().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<Option<IngestJob>, StoreError> {
        Ok(self
            .inner
            .read()
            .jobs
            .get(job_id)
            .filter(|job| job.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_open_job(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IngestJob>, StoreError> {
        Ok(self
            .inner
            .read()
            .jobs
            .values()
            .find(|job| {
                job.tenant_id == tenant_id
                    && job.idempotency_key == idempotency_key
                    && job.status.is_open()
            })
            .cloned())
    }

    async fn claim_job(&self, tenant_id: &str, job_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some(job) = inner
            .jobs
            .get_mut(job_id)
            .filter(|job| job.tenant_id == tenant_id)
        else {
            return Err(StoreError::NotFound("job"));
        };
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_job_for_review(
        &self,
        tenant_id: &str,
        job_id: &str,
        proposal: &IngestProposal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let Some(job) = inner
            .jobs
            .get_mut(job_id)
            .filter(|job| job.tenant_id == tenant_id)
        else {
            return Err(StoreError::NotFound("job"));
        };
        if job.status != JobStatus::Processing {
            return Err(StoreError::Conflict(format!(
                "job is '{}', expected 'processing'",
                job.status.as_str()
            )));
        }
        job.status = JobStatus::NeedsReview;
        job.proposal_id = Some(proposal.id.clone());
        job.updated_at = Utc::now();
        inner
            .proposals
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn fail_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let Some(job) = inner
            .jobs
            .get_mut(job_id)
            .filter(|job| job.tenant_id == tenant_id)
        else {
            return Err(StoreError::NotFound("job"));
        };
        job.status = JobStatus::Failed;
        job.error = Some(error.clone());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<Option<IngestProposal>, StoreError> {
        Ok(self
            .inner
            .read()
            .proposals
            .get(proposal_id)
            .filter(|proposal| proposal.tenant_id == tenant_id)
            .cloned())
    }

    async fn apply_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<AppliedProposal, StoreError> {
        let mut inner = self.inner.write();
        let proposal = inner
            .proposals
            .get(proposal_id)
            .filter(|proposal| proposal.tenant_id == tenant_id)
            .cloned()
            .ok_or(StoreError::NotFound("proposal"))?;
        if proposal.status == ProposalStatus::Rejected {
            return Err(StoreError::Conflict(
                "cannot apply a rejected proposal".into(),
            ));
        }
        let job = inner
            .jobs
            .get(&proposal.job_id)
            .cloned()
            .ok_or(StoreError::NotFound("job"))?;

        let mut item_ids = Vec::with_capacity(proposal.items.len());
        for item in &proposal.items {
            let id = item.deterministic_id(&job.kind);
            inner.items.insert(
                id.clone(),
                TargetItem {
                    id: id.clone(),
                    tenant_id: tenant_id.to_string(),
                    target_id: job.target_id.clone(),
                    kind: job.kind.clone(),
                    item: item.clone(),
                },
            );
            item_ids.push(id);
        }

        if let Some(stored) = inner.proposals.get_mut(proposal_id) {
            stored.status = ProposalStatus::Applied;
        }
        if let Some(stored) = inner.jobs.get_mut(&proposal.job_id) {
            stored.status = JobStatus::Applied;
            stored.updated_at = Utc::now();
        }

        Ok(AppliedProposal {
            proposal_id: proposal_id.to_string(),
            job_id: proposal.job_id,
            item_ids,
        })
    }

    async fn reject_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let proposal = inner
            .proposals
            .get(proposal_id)
            .filter(|proposal| proposal.tenant_id == tenant_id)
            .cloned()
            .ok_or(StoreError::NotFound("proposal"))?;
        match proposal.status {
            ProposalStatus::Applied => {
                return Err(StoreError::Conflict(
                    "cannot reject an applied proposal".into(),
                ));
            }
            ProposalStatus::Rejected => return Ok(()),
            ProposalStatus::Proposed => {}
        }
        if let Some(stored) = inner.proposals.get_mut(proposal_id) {
            stored.status = ProposalStatus::Rejected;
        }
        if let Some(job) = inner.jobs.get_mut(&proposal.job_id) {
            job.status = JobStatus::Failed;
            job.error = Some(StructuredError::new(
                "proposal_rejected",
                format!("rejected by reviewer: {reason}"),
            ));
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}
