//! Tenant-scoped knowledge ingestion and retrieval for untrusted content.
//!
//! ```text
//! Trigger ──► ingestion::DocumentIngestor
//!               │
//!               ├─► extract::DocumentExtractor ──┬─► fetch::GuardedFetcher (SSRF guard)
//!               │                                ├─► extract::TieredExtractor
//!               │                                └─► providers (vision / renderer / storage)
//!               ├─► chunking::Chunker ──► content-hash dedup
//!               └─► ingestion::EmbeddingWriter ──► stores::KnowledgeStore
//!
//! Question ──► retrieval::RetrievalEngine ──► context + citations
//!
//! Sources ──► jobs::JobRunner ──► IngestProposal ──► apply / reject
//! ```
//!
//! Everything is scoped to a tenant: documents, chunks, jobs, proposals,
//! caps, and retrieval all carry and filter on the tenant id. The core is
//! safe to invoke concurrently under at-least-once delivery — writes are
//! idempotent (content-hash keys, idempotency keys) and transitions are
//! persisted-status re-checks, not locks.

pub mod chunking;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod ingestion;
pub mod jobs;
pub mod providers;
pub mod retrieval;
pub mod stores;
pub mod types;

pub use chunking::{content_hash, Chunker, TextChunk};
pub use config::{
    ChunkingConfig, FetchLimits, GuardPolicy, IngestionLimits, JobLimits, RetrievalConfig,
};
pub use extract::{DocumentExtractor, ExtractedDocument, PageExtraction, TieredExtractor};
pub use fetch::{FetchedPage, GuardedFetcher, UrlGuard};
pub use ingestion::{DocumentIngestor, EmbeddingWriter, IngestReport};
pub use jobs::{
    CandidateItem, IngestJob, IngestProposal, IngestSource, JobOutcome, JobRunner, JobStatus,
    ProposalStatus,
};
pub use retrieval::{Citation, RetrievalEngine, RetrievedContext};
pub use stores::{
    ChunkRecord, DocumentSource, DocumentStatus, KnowledgeDocument, KnowledgeStore, MemoryStore,
    SqliteKnowledgeStore,
};
pub use types::{
    ExtractError, FetchError, JobError, LoreError, ProviderError, StoreError, StructuredError,
};
