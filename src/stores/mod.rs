//! Knowledge storage: documents, chunks, jobs, proposals, and vector search.
//!
//! The [`KnowledgeStore`] trait is the single seam between the pipeline and
//! persistence. Two implementations ship:
//!
//! * [`sqlite::SqliteKnowledgeStore`] — SQLite with vector search via
//!   `sqlite-vec`; the production backend.
//! * [`memory::MemoryStore`] — in-memory with brute-force cosine distance;
//!   the test backend and the semantics reference.
//!
//! Every read and write is tenant-scoped. Chunk identity is the content
//! hash, so repeated writes of identical text are no-ops in effect, and
//! status transitions are guarded by `WHERE`-style state re-checks rather
//! than locks: a writer that lost a race observes zero affected rows and
//! no-ops.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{IngestJob, IngestProposal};
use crate::types::{StoreError, StructuredError};

pub use memory::MemoryStore;
pub use sqlite::SqliteKnowledgeStore;

/// Where a document's content comes from. Closed set: every pipeline match
/// over this enum is exhaustive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    Text { content: String },
    Url { url: String },
    Pdf { storage_path: String },
    Image { storage_path: String },
    File { storage_path: String },
}

impl DocumentSource {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentSource::Text { .. } => "text",
            DocumentSource::Url { .. } => "url",
            DocumentSource::Pdf { .. } => "pdf",
            DocumentSource::Image { .. } => "image",
            DocumentSource::File { .. } => "file",
        }
    }

    /// Citation-friendly name when extraction did not supply a better one.
    pub fn source_name(&self) -> String {
        match self {
            DocumentSource::Text { .. } => "inline text".into(),
            DocumentSource::Url { url } => url.clone(),
            DocumentSource::Pdf { storage_path }
            | DocumentSource::Image { storage_path }
            | DocumentSource::File { storage_path } => storage_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Active,
    Failed,
    Disabled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Active => "active",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "processing" => Some(DocumentStatus::Processing),
            "active" => Some(DocumentStatus::Active),
            "failed" => Some(DocumentStatus::Failed),
            "disabled" => Some(DocumentStatus::Disabled),
            _ => None,
        }
    }
}

/// One ingested source for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub tenant_id: String,
    pub source: DocumentSource,
    pub status: DocumentStatus,
    pub chunk_count: u32,
    pub content_hash: Option<String>,
    pub page_count: Option<u32>,
    pub mime_type: Option<String>,
    pub error: Option<StructuredError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    /// A fresh document in `processing`, awaiting its first ingestion run.
    pub fn new_processing(tenant_id: impl Into<String>, source: DocumentSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            source,
            status: DocumentStatus::Processing,
            chunk_count: 0,
            content_hash: None,
            page_count: None,
            mime_type: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Active,
    Disabled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Active => "active",
            ChunkStatus::Disabled => "disabled",
        }
    }
}

/// A stored fragment of a document's normalized text plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// SHA-256 of the content; the storage key.
    pub content_hash: String,
    pub document_id: String,
    /// Denormalized for query filtering.
    pub tenant_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub status: ChunkStatus,
    pub embedding: Vec<f32>,
}

/// One vector-search hit, distance-ordered (lower is more similar).
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content_hash: String,
    pub document_id: String,
    pub source_name: String,
    pub content: String,
    /// Cosine distance to the query.
    pub distance: f32,
}

/// Item ids written by a proposal application.
#[derive(Debug, Clone)]
pub struct AppliedProposal {
    pub proposal_id: String,
    pub job_id: String,
    pub item_ids: Vec<String>,
}

/// Persistence seam for the whole pipeline.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    // ---- documents ----

    async fn insert_document(&self, document: &KnowledgeDocument) -> Result<(), StoreError>;

    async fn get_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<KnowledgeDocument>, StoreError>;

    /// Success transition: `active`, counts and hashes set, prior error
    /// cleared — one atomic update. Refused for disabled documents.
    async fn finalize_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        chunk_count: u32,
        content_hash: &str,
        page_count: Option<u32>,
        mime_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Failure transition: `failed` with a structured error. Refused for
    /// disabled documents.
    async fn fail_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError>;

    /// Explicit enable/disable toggle; cascades status to the document's
    /// chunks. Only valid on `active`/`disabled` documents.
    async fn set_document_enabled(
        &self,
        tenant_id: &str,
        document_id: &str,
        enabled: bool,
    ) -> Result<(), StoreError>;

    // ---- chunks ----

    /// Idempotent batch upsert keyed on content hash.
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), StoreError>;

    /// Remove a document's chunks whose hashes are not in `keep`; returns
    /// how many were pruned. Re-ingesting identical text prunes nothing.
    async fn prune_document_chunks(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<usize, StoreError>;

    /// Tenant-wide active chunk count, optionally excluding one document's
    /// own chunks (cap accounting for re-ingestion).
    async fn active_chunk_count(
        &self,
        tenant_id: &str,
        exclude_document: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// `k` nearest active chunks for the tenant by cosine distance,
    /// ascending. Chunks of non-active documents never appear.
    async fn search_chunks(
        &self,
        tenant_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;

    // ---- jobs ----

    async fn insert_job(&self, job: &IngestJob) -> Result<(), StoreError>;

    async fn get_job(&self, tenant_id: &str, job_id: &str)
        -> Result<Option<IngestJob>, StoreError>;

    /// The open (queued/processing/needs_review) job holding this
    /// idempotency key, if any.
    async fn find_open_job(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IngestJob>, StoreError>;

    /// `queued → processing`, returning whether this caller won the claim.
    /// A job already out of `queued` yields `false`, never an error.
    async fn claim_job(&self, tenant_id: &str, job_id: &str) -> Result<bool, StoreError>;

    /// Persist the proposal and move the job to `needs_review` in one
    /// atomic unit. Refused when the job is no longer `processing`.
    async fn complete_job_for_review(
        &self,
        tenant_id: &str,
        job_id: &str,
        proposal: &IngestProposal,
    ) -> Result<(), StoreError>;

    async fn fail_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError>;

    // ---- proposals ----

    async fn get_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<Option<IngestProposal>, StoreError>;

    /// In one atomic unit: upsert every item into the target's collection
    /// under its deterministic id, mark the proposal `applied`, mark the
    /// linked job `applied`. Re-applying an applied proposal is idempotent.
    async fn apply_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<AppliedProposal, StoreError>;

    /// Mark the proposal `rejected` and the linked job `failed` with the
    /// reviewer's reason.
    async fn reject_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
        reason: &str,
    ) -> Result<(), StoreError>;
}
