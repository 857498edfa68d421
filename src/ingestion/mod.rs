//! Turning extracted text into persisted, embedded chunk sets.
//!
//! * [`writer`] — cap-checked, batched, idempotent chunk persistence.
//! * [`pipeline`] — end-to-end document ingestion orchestration.

pub mod pipeline;
pub mod writer;

pub use pipeline::{DocumentIngestor, IngestReport};
pub use writer::{EmbeddingWriter, WriteOutcome};
