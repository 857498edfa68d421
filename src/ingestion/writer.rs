//! Embedding and persistence of a document's chunk set.
//!
//! Order of operations is the contract: the tenant cap is checked before a
//! single embedding call is spent, chunks are embedded sequentially (the
//! rate-limit-friendly shape), written in fixed-size batches keyed by
//! content hash, stale chunks from a previous run are pruned, and the parent
//! document is finalized in one update. Any failure marks the document
//! `failed` with a structured error and propagates so the external trigger
//! can retry; committed chunks from a prior successful run stay intact.

use std::sync::Arc;

use tracing::debug;

use crate::chunking::TextChunk;
use crate::config::IngestionLimits;
use crate::providers::EmbeddingProvider;
use crate::stores::{ChunkRecord, ChunkStatus, KnowledgeDocument, KnowledgeStore};
use crate::types::{LoreError, StoreError};

/// Result of a successful chunk-set write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub chunk_count: u32,
    /// Hash of the full normalized text, stored on the document.
    pub content_hash: String,
    /// Chunks from a previous run that are no longer part of the document.
    pub pruned: usize,
}

/// Writes embedded chunks under the tenant cap.
pub struct EmbeddingWriter {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    limits: IngestionLimits,
}

impl EmbeddingWriter {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        limits: IngestionLimits,
    ) -> Self {
        Self {
            store,
            embedder,
            limits,
        }
    }

    /// Embed and persist `chunks` for `document`, then finalize it.
    ///
    /// On failure the document is marked `failed` before the error
    /// propagates.
    pub async fn write_document_chunks(
        &self,
        document: &KnowledgeDocument,
        full_text: &str,
        chunks: Vec<TextChunk>,
        page_count: Option<u32>,
        mime_type: Option<&str>,
    ) -> Result<WriteOutcome, LoreError> {
        match self
            .write_inner(document, full_text, chunks, page_count, mime_type)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Preserve the original failure even if the status write
                // also fails.
                let structured = err.to_structured();
                if let Err(mark_err) = self
                    .store
                    .fail_document(&document.tenant_id, &document.id, &structured)
                    .await
                {
                    tracing::warn!(
                        document_id = %document.id,
                        error = %mark_err,
                        "failed to persist document failure status"
                    );
                }
                Err(err)
            }
        }
    }

    async fn write_inner(
        &self,
        document: &KnowledgeDocument,
        full_text: &str,
        chunks: Vec<TextChunk>,
        page_count: Option<u32>,
        mime_type: Option<&str>,
    ) -> Result<WriteOutcome, LoreError> {
        // Cap check first: no embedding spend on a write that cannot land.
        // The document's own prior chunks are excluded so re-ingestion of an
        // existing document is not falsely rejected.
        let existing = self
            .store
            .active_chunk_count(&document.tenant_id, Some(&document.id))
            .await?;
        let cap = self.limits.tenant_chunk_cap;
        if existing + chunks.len() as u64 > cap {
            return Err(StoreError::CapExceeded { cap }.into());
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let embedding = self.embedder.embed(&chunk.content).await?;
            records.push(ChunkRecord {
                content_hash: chunk.content_hash.clone(),
                document_id: document.id.clone(),
                tenant_id: document.tenant_id.clone(),
                chunk_index: chunk.index,
                content: chunk.content.clone(),
                status: ChunkStatus::Active,
                embedding,
            });
        }

        for batch in records.chunks(self.limits.write_batch_size.max(1)) {
            self.store.upsert_chunks(batch).await?;
        }

        let keep: Vec<String> = records
            .iter()
            .map(|record| record.content_hash.clone())
            .collect();
        let pruned = self
            .store
            .prune_document_chunks(&document.id, &keep)
            .await?;

        let content_hash = crate::chunking::content_hash(full_text);
        self.store
            .finalize_document(
                &document.tenant_id,
                &document.id,
                records.len() as u32,
                &content_hash,
                page_count,
                mime_type,
            )
            .await?;

        debug!(
            document_id = %document.id,
            chunks = records.len(),
            pruned,
            "document chunk set committed"
        );

        Ok(WriteOutcome {
            chunk_count: records.len() as u32,
            content_hash,
            pruned,
        })
    }
}
