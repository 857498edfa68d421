//! Shared error taxonomy and the structured error persisted on records.
//!
//! Each pipeline boundary carries its own error enum ([`FetchError`],
//! [`ExtractError`], [`StoreError`], [`ProviderError`], [`JobError`]); the
//! crate-level [`LoreError`] folds them together for callers that drive a
//! whole ingestion or retrieval unit. Callers receive a status field and a
//! [`StructuredError`], never a stack trace.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable `{code, message}` pair persisted on the owning document
/// or job when a unit of work fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
}

impl StructuredError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors raised by the guarded fetcher.
///
/// `UrlNotAllowed` is a policy violation and must never be retried; the
/// remaining variants are resource limits or transient I/O, retryable by the
/// external trigger's policy.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL (or a redirect hop, or a resolved address) violates the
    /// network policy. Fail closed.
    #[error("url not allowed: {0}")]
    UrlNotAllowed(String),

    /// Response body exceeds the size cap for its content class.
    #[error("response exceeds size limit of {limit} bytes")]
    TooLarge { limit: u64 },

    /// Network-level failure: connect, TLS, protocol, malformed redirect.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Wall-clock deadline for the whole attempt elapsed.
    #[error("fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::UrlNotAllowed(_) => "url_not_allowed",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::FetchFailed(_) => "fetch_failed",
            FetchError::Timeout { .. } => "timeout",
        }
    }
}

/// Errors raised while turning a source into normalized text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source descriptor is missing the field its kind requires.
    #[error("missing source field: {0}")]
    MissingSourceField(&'static str),

    /// The page responded but is blocking automated access. The
    /// classification label (`blocked_403`, `rate_limited_429`,
    /// `captcha_challenge`) is user-actionable and distinct from a generic
    /// fetch failure.
    #[error("source is blocking extraction ({classification})")]
    Blocked { classification: &'static str },

    /// No meaningful text could be extracted from the source.
    #[error("no extractable content ({classification})")]
    NoContent { classification: &'static str },

    /// Document exceeds the page-count cap.
    #[error("document has {pages} pages, limit is {limit}")]
    TooManyPages { pages: u32, limit: u32 },

    /// Extraction mechanics failed (parse error, collaborator failure).
    #[error("extract failed: {0}")]
    ExtractFailed(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::MissingSourceField(_) => "missing_source_field",
            ExtractError::Blocked { classification } => classification,
            ExtractError::NoContent { .. } => "no_content",
            ExtractError::TooManyPages { .. } => "too_many_pages",
            ExtractError::ExtractFailed(_) => "extract_failed",
            ExtractError::Fetch(err) => err.code(),
            ExtractError::Provider(_) => "provider_error",
        }
    }
}

/// Errors raised by knowledge store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend-level failure (connection, SQL, serialization of a row).
    #[error("storage error: {0}")]
    Storage(String),

    /// The referenced record does not exist within the tenant's scope.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Writing would push the tenant past its active-chunk cap. No partial
    /// write has happened.
    #[error("tenant active-chunk cap of {cap} exceeded")]
    CapExceeded { cap: u64 },

    /// The record is not in a state that permits the requested transition.
    #[error("conflicting state transition: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Storage(_) => "storage_error",
            StoreError::NotFound(_) => "not_found",
            StoreError::CapExceeded { .. } => "cap_exceeded",
            StoreError::Conflict(_) => "conflict",
        }
    }
}

/// Errors raised by external collaborators (embedding, generation, vision,
/// rendering, blob storage). Treated as transient and retryable unless the
/// payload itself is malformed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The collaborator call failed; safe to retry with backoff.
    #[error("{provider} provider error: {message}")]
    Failed {
        provider: &'static str,
        message: String,
    },

    /// The collaborator answered, but the payload violates its contract.
    /// Retrying without different input does not help.
    #[error("{provider} returned a malformed payload: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

/// Errors raised by the ingest job state machine.
#[derive(Debug, Error)]
pub enum JobError {
    /// The generation collaborator's output could not be parsed under the
    /// schema-only-JSON contract.
    #[error("malformed generation output: {0}")]
    MalformedGeneration(String),

    /// A job-defining input is invalid (no sources, too many sources).
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::MalformedGeneration(_) => "malformed_generation",
            JobError::InvalidInput(_) => "invalid_input",
            JobError::Extract(err) => err.code(),
            JobError::Provider(_) => "provider_error",
        }
    }
}

/// Crate-level umbrella error for callers driving whole pipeline units.
#[derive(Debug, Error)]
pub enum LoreError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl LoreError {
    /// Collapse into the structured form persisted on documents and jobs.
    pub fn to_structured(&self) -> StructuredError {
        let code = match self {
            LoreError::Fetch(err) => err.code(),
            LoreError::Extract(err) => err.code(),
            LoreError::Store(err) => err.code(),
            LoreError::Provider(_) => "provider_error",
            LoreError::Job(err) => err.code(),
        };
        StructuredError::new(code, self.to_string())
    }
}
