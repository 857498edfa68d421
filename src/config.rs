//! Tuning knobs for fetching, chunking, ingestion, retrieval, and jobs.
//!
//! Every struct ships conservative defaults and a `from_env()` constructor
//! that applies `LORESMITH_*` environment overrides (loaded through
//! `dotenvy`, so a local `.env` file works in development).

use std::str::FromStr;
use std::time::Duration;

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    dotenvy::var(key).ok().and_then(|raw| raw.parse().ok())
}

/// Network policy applied by the URL guard.
///
/// The defaults fail closed. `allow_insecure_transport` and
/// `allow_private_targets` exist for development and test rigs that fetch
/// from a local mock server; the hostname blocklist and the link-local
/// (cloud metadata) ranges stay enforced even then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Permit plain `http` and non-default ports.
    pub allow_insecure_transport: bool,
    /// Permit loopback and RFC 1918 targets.
    pub allow_private_targets: bool,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            allow_insecure_transport: false,
            allow_private_targets: false,
        }
    }
}

impl GuardPolicy {
    /// Policy for test rigs that talk to a mock server on loopback.
    pub fn permissive() -> Self {
        Self {
            allow_insecure_transport: true,
            allow_private_targets: true,
        }
    }
}

/// Size, time, and redirect limits for one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    /// Cap for HTML/text/JSON responses.
    pub max_html_bytes: u64,
    /// Cap for binary assets (PDFs, images).
    pub max_asset_bytes: u64,
    /// Wall-clock deadline for the whole attempt, redirects included.
    pub timeout: Duration,
    /// Maximum redirect hops followed; each hop is re-validated.
    pub max_redirects: u32,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_html_bytes: 2 * 1024 * 1024,
            max_asset_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_secs(20),
            max_redirects: 5,
        }
    }
}

impl FetchLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_html_bytes: env_override("LORESMITH_MAX_HTML_BYTES")
                .unwrap_or(defaults.max_html_bytes),
            max_asset_bytes: env_override("LORESMITH_MAX_ASSET_BYTES")
                .unwrap_or(defaults.max_asset_bytes),
            timeout: env_override("LORESMITH_FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_redirects: env_override("LORESMITH_MAX_REDIRECTS")
                .unwrap_or(defaults.max_redirects),
        }
    }
}

/// Window/overlap parameters for the character chunker.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// How far past the window edge to look for a sentence/line boundary.
    pub boundary_lookahead: usize,
    /// Chunks shorter than this are dropped as noise.
    pub min_chunk_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 150,
            boundary_lookahead: 160,
            min_chunk_len: 40,
        }
    }
}

impl ChunkingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: env_override("LORESMITH_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            overlap: env_override("LORESMITH_CHUNK_OVERLAP").unwrap_or(defaults.overlap),
            boundary_lookahead: env_override("LORESMITH_CHUNK_LOOKAHEAD")
                .unwrap_or(defaults.boundary_lookahead),
            min_chunk_len: env_override("LORESMITH_CHUNK_MIN_LEN")
                .unwrap_or(defaults.min_chunk_len),
        }
    }
}

/// Caps and heuristics applied while ingesting a document.
#[derive(Debug, Clone)]
pub struct IngestionLimits {
    /// Tenant-wide cap on active chunks (soft limit under races).
    pub tenant_chunk_cap: u64,
    /// Chunks written per storage batch.
    pub write_batch_size: usize,
    /// PDFs above this page count skip local extraction.
    pub max_pdf_pages: u32,
    /// Below this many characters a page is considered not meaningful.
    pub min_meaningful_chars: usize,
    /// Same-origin candidate links followed when the primary page is thin.
    pub max_candidate_links: usize,
}

impl Default for IngestionLimits {
    fn default() -> Self {
        Self {
            tenant_chunk_cap: 5_000,
            write_batch_size: 16,
            max_pdf_pages: 50,
            min_meaningful_chars: 200,
            max_candidate_links: 3,
        }
    }
}

impl IngestionLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tenant_chunk_cap: env_override("LORESMITH_TENANT_CHUNK_CAP")
                .unwrap_or(defaults.tenant_chunk_cap),
            write_batch_size: env_override("LORESMITH_WRITE_BATCH_SIZE")
                .unwrap_or(defaults.write_batch_size),
            max_pdf_pages: env_override("LORESMITH_MAX_PDF_PAGES")
                .unwrap_or(defaults.max_pdf_pages),
            min_meaningful_chars: env_override("LORESMITH_MIN_MEANINGFUL_CHARS")
                .unwrap_or(defaults.min_meaningful_chars),
            max_candidate_links: env_override("LORESMITH_MAX_CANDIDATE_LINKS")
                .unwrap_or(defaults.max_candidate_links),
        }
    }
}

/// Retrieval-time candidate counts and filters.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbors fetched from the store before filtering.
    pub fetch_k: usize,
    /// Diversity cap: max chunks kept per source document.
    pub per_document_cap: usize,
    /// Cosine-distance threshold; candidates above it are dropped unless the
    /// filtered set would be empty.
    pub max_distance: f32,
    /// Chunks assembled into the final context block.
    pub context_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fetch_k: 20,
            per_document_cap: 2,
            max_distance: 0.7,
            context_chunks: 8,
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fetch_k: env_override("LORESMITH_RETRIEVAL_FETCH_K").unwrap_or(defaults.fetch_k),
            per_document_cap: env_override("LORESMITH_RETRIEVAL_DOC_CAP")
                .unwrap_or(defaults.per_document_cap),
            max_distance: env_override("LORESMITH_RETRIEVAL_MAX_DISTANCE")
                .unwrap_or(defaults.max_distance),
            context_chunks: env_override("LORESMITH_RETRIEVAL_CONTEXT_CHUNKS")
                .unwrap_or(defaults.context_chunks),
        }
    }
}

/// Limits for the ingest job pipeline.
#[derive(Debug, Clone)]
pub struct JobLimits {
    /// Sources extracted concurrently within one job.
    pub source_concurrency: usize,
    /// Maximum sources accepted per job submission.
    pub max_sources: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            source_concurrency: 4,
            max_sources: 10,
        }
    }
}

impl JobLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            source_concurrency: env_override("LORESMITH_JOB_SOURCE_CONCURRENCY")
                .unwrap_or(defaults.source_concurrency),
            max_sources: env_override("LORESMITH_JOB_MAX_SOURCES")
                .unwrap_or(defaults.max_sources),
        }
    }
}
