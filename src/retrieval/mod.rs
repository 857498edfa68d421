//! Retrieval engine: nearest chunks → diverse, relevant, bounded context.
//!
//! The filter order is deliberate and load-bearing: the per-document
//! diversity cap runs before the distance threshold, so when the threshold
//! would empty the candidate set the engine can fall back to the diversified
//! set instead of returning nothing. A poor-but-diverse answer context beats
//! an empty one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::RetrievalConfig;
use crate::providers::EmbeddingProvider;
use crate::stores::{KnowledgeStore, RetrievedChunk};
use crate::types::LoreError;

/// One entry in the citation list, parallel to the numbered context block.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub chunk_hash: String,
    pub source_name: String,
    /// Cosine distance of the cited chunk (lower is more similar).
    pub score: f32,
}

/// Assembled context for a question.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Numbered context block, empty when `has_context` is false.
    pub context: String,
    pub citations: Vec<Citation>,
    /// Whether any usable chunk was found. Zero matches is a normal
    /// outcome, not an error.
    pub has_context: bool,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self {
            context: String::new(),
            citations: Vec::new(),
            has_context: false,
        }
    }
}

/// Answers "what does this tenant's knowledge say about X?".
pub struct RetrievalEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Retrieve context and citations for a natural-language question.
    #[instrument(skip(self, question), fields(tenant_id))]
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        question: &str,
    ) -> Result<RetrievedContext, LoreError> {
        let query = self.embedder.embed(question).await?;
        let hits = self
            .store
            .search_chunks(tenant_id, &query, self.config.fetch_k)
            .await?;

        if hits.is_empty() {
            debug!(tenant_id, "no candidate chunks");
            return Ok(RetrievedContext::empty());
        }

        let diversified = diversify(hits, self.config.per_document_cap);
        let filtered = apply_threshold(&diversified, self.config.max_distance);
        // Threshold emptied the set: fall back rather than answer with
        // nothing while candidates existed.
        let pool = if filtered.is_empty() {
            debug!(
                tenant_id,
                max_distance = self.config.max_distance,
                "threshold emptied candidates, falling back to diversified set"
            );
            diversified
        } else {
            filtered
        };

        let selected: Vec<RetrievedChunk> =
            pool.into_iter().take(self.config.context_chunks).collect();

        let mut context = String::new();
        let mut citations = Vec::with_capacity(selected.len());
        for (position, hit) in selected.iter().enumerate() {
            if position > 0 {
                context.push_str("\n\n");
            }
            context.push_str(&format!("[{}] {}", position + 1, hit.content));
            citations.push(Citation {
                document_id: hit.document_id.clone(),
                chunk_hash: hit.content_hash.clone(),
                source_name: hit.source_name.clone(),
                score: hit.distance,
            });
        }

        debug!(tenant_id, selected = citations.len(), "context assembled");

        Ok(RetrievedContext {
            context,
            citations,
            has_context: true,
        })
    }
}

/// Walk hits in distance order, keeping at most `cap` chunks per source
/// document so one over-represented document cannot dominate the context.
fn diversify(hits: Vec<RetrievedChunk>, cap: usize) -> Vec<RetrievedChunk> {
    if cap == 0 {
        return Vec::new();
    }
    let mut per_document: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(hits.len());
    for hit in hits {
        let seen = per_document.entry(hit.document_id.clone()).or_insert(0);
        if *seen < cap {
            *seen += 1;
            kept.push(hit);
        }
    }
    kept
}

/// Keep hits at or below the distance threshold.
fn apply_threshold(hits: &[RetrievedChunk], max_distance: f32) -> Vec<RetrievedChunk> {
    hits.iter()
        .filter(|hit| hit.distance <= max_distance)
        .cloned()
        .collect()
}
