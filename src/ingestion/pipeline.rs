//! Document ingestion orchestration: extract → chunk → embed → persist.
//!
//! Safe to invoke concurrently and repeatedly: the worker re-checks the
//! document's persisted status before doing work, and every write below it
//! is idempotent, so at-least-once delivery of `{tenant_id, document_id}`
//! triggers is harmless.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::chunking::Chunker;
use crate::extract::DocumentExtractor;
use crate::ingestion::writer::EmbeddingWriter;
use crate::stores::{DocumentStatus, KnowledgeStore};
use crate::types::{LoreError, StoreError};

/// What one ingestion invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestReport {
    /// Document extracted, chunked, embedded, and finalized.
    Completed { chunk_count: u32 },
    /// The document was not in an ingestable state; nothing was done.
    Skipped { status: DocumentStatus },
}

/// Drives one document through the full ingestion pipeline.
pub struct DocumentIngestor {
    store: Arc<dyn KnowledgeStore>,
    extractor: DocumentExtractor,
    chunker: Chunker,
    writer: EmbeddingWriter,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        extractor: DocumentExtractor,
        chunker: Chunker,
        writer: EmbeddingWriter,
    ) -> Self {
        Self {
            store,
            extractor,
            chunker,
            writer,
        }
    }

    /// Ingest (or re-ingest) one document by id.
    ///
    /// Disabled documents are skipped: the tenant turned them off and a
    /// queued trigger must not silently turn them back on. Extraction and
    /// chunking failures mark the document `failed` and propagate; the
    /// caller's retry policy decides what happens next.
    #[instrument(skip(self), fields(tenant_id, document_id))]
    pub async fn ingest_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<IngestReport, LoreError> {
        let document = self
            .store
            .get_document(tenant_id, document_id)
            .await?
            .ok_or(StoreError::NotFound("document"))?;

        if document.status == DocumentStatus::Disabled {
            return Ok(IngestReport::Skipped {
                status: document.status,
            });
        }

        let extracted = match self.extractor.extract(&document.source).await {
            Ok(extracted) => extracted,
            Err(err) => {
                let lore_err = LoreError::from(err);
                let structured = lore_err.to_structured();
                if let Err(mark_err) = self
                    .store
                    .fail_document(tenant_id, document_id, &structured)
                    .await
                {
                    warn!(
                        document_id,
                        error = %mark_err,
                        "failed to persist extraction failure"
                    );
                }
                return Err(lore_err);
            }
        };

        let chunks = self.chunker.chunk(&extracted.text);
        let outcome = self
            .writer
            .write_document_chunks(
                &document,
                &extracted.text,
                chunks,
                extracted.page_count,
                extracted.mime_type.as_deref(),
            )
            .await?;

        info!(
            document_id,
            chunks = outcome.chunk_count,
            pruned = outcome.pruned,
            "document ingested"
        );

        Ok(IngestReport::Completed {
            chunk_count: outcome.chunk_count,
        })
    }
}
