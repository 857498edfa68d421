//! Retrieval engine behavior: diversity, threshold fallback, formatting.

use std::sync::Arc;

use loresmith::config::RetrievalConfig;
use loresmith::providers::mocks::MockEmbeddingProvider;
use loresmith::retrieval::RetrievalEngine;
use loresmith::stores::{
    ChunkRecord, ChunkStatus, DocumentSource, DocumentStatus, KnowledgeDocument, KnowledgeStore,
    MemoryStore,
};

const TENANT: &str = "tenant-1";

async fn seed_document(store: &MemoryStore, name: &str) -> String {
    let mut doc = KnowledgeDocument::new_processing(
        TENANT,
        DocumentSource::Url {
            url: format!("https://{name}.example/menu"),
        },
    );
    doc.status = DocumentStatus::Active;
    store.insert_document(&doc).await.unwrap();
    doc.id
}

async fn seed_chunk(store: &MemoryStore, doc_id: &str, hash: &str, embedding: Vec<f32>) {
    store
        .upsert_chunks(&[ChunkRecord {
            content_hash: hash.into(),
            document_id: doc_id.into(),
            tenant_id: TENANT.into(),
            chunk_index: 0,
            content: format!("chunk body {hash}"),
            status: ChunkStatus::Active,
            embedding,
        }])
        .await
        .unwrap();
}

/// Query is pinned to the unit x-axis so chunk distances are readable:
/// `[1, 0]` is distance 0, `[0, 1]` is distance 1.
fn engine(store: Arc<MemoryStore>, config: RetrievalConfig) -> RetrievalEngine {
    RetrievalEngine::new(
        store,
        Arc::new(MockEmbeddingProvider::fixed(vec![1.0, 0.0])),
        config,
    )
}

#[tokio::test]
async fn empty_store_means_no_context_not_an_error() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store, RetrievalConfig::default());

    let result = engine.retrieve(TENANT, "what is on the menu?").await.unwrap();
    assert!(!result.has_context);
    assert!(result.citations.is_empty());
    assert!(result.context.is_empty());
}

#[tokio::test]
async fn diversity_cap_limits_one_documents_share() {
    let store = Arc::new(MemoryStore::new());
    let doc_a = seed_document(&store, "dominant").await;
    let doc_b = seed_document(&store, "minor").await;

    // Document A owns the four nearest chunks; B's single chunk is farther.
    seed_chunk(&store, &doc_a, "a1", vec![1.0, 0.01]).await;
    seed_chunk(&store, &doc_a, "a2", vec![1.0, 0.02]).await;
    seed_chunk(&store, &doc_a, "a3", vec![1.0, 0.03]).await;
    seed_chunk(&store, &doc_a, "a4", vec![1.0, 0.04]).await;
    seed_chunk(&store, &doc_b, "b1", vec![0.9, 0.4]).await;

    let engine = engine(
        store,
        RetrievalConfig {
            per_document_cap: 2,
            ..RetrievalConfig::default()
        },
    );
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();

    assert!(result.has_context);
    let from_a = result
        .citations
        .iter()
        .filter(|c| c.document_id == doc_a)
        .count();
    assert_eq!(from_a, 2, "at most the cap from one document");
    assert!(result.citations.iter().any(|c| c.document_id == doc_b));
}

#[tokio::test]
async fn threshold_filters_but_never_empties_the_result() {
    let store = Arc::new(MemoryStore::new());
    let doc = seed_document(&store, "distant").await;
    // Both chunks sit far beyond the 0.7 threshold.
    seed_chunk(&store, &doc, "far1", vec![0.0, 1.0]).await;
    seed_chunk(&store, &doc, "far2", vec![-0.5, 1.0]).await;

    let engine = engine(store, RetrievalConfig::default());
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();

    assert!(
        result.has_context,
        "fallback keeps the diversified set instead of returning nothing"
    );
    assert!(!result.citations.is_empty());
    assert!(result.citations.iter().all(|c| c.score > 0.7));
}

#[tokio::test]
async fn threshold_drops_distant_hits_when_close_ones_exist() {
    let store = Arc::new(MemoryStore::new());
    let doc_a = seed_document(&store, "near").await;
    let doc_b = seed_document(&store, "far").await;
    seed_chunk(&store, &doc_a, "near1", vec![1.0, 0.05]).await;
    seed_chunk(&store, &doc_b, "far1", vec![0.0, 1.0]).await;

    let engine = engine(store, RetrievalConfig::default());
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();

    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].chunk_hash, "near1");
}

#[tokio::test]
async fn context_is_numbered_and_parallel_to_citations() {
    let store = Arc::new(MemoryStore::new());
    let doc = seed_document(&store, "cafe").await;
    seed_chunk(&store, &doc, "c1", vec![1.0, 0.0]).await;
    seed_chunk(&store, &doc, "c2", vec![1.0, 0.2]).await;

    let engine = engine(store, RetrievalConfig::default());
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();

    assert_eq!(result.citations.len(), 2);
    assert!(result.context.starts_with("[1] chunk body c1"));
    assert!(result.context.contains("[2] chunk body c2"));
    assert!(result.citations[0].score <= result.citations[1].score);
    assert_eq!(result.citations[0].source_name, "https://cafe.example/menu");
}

#[tokio::test]
async fn results_are_capped_at_the_configured_chunk_count() {
    let store = Arc::new(MemoryStore::new());
    // Many single-chunk documents, all close to the query.
    for i in 0..12 {
        let doc = seed_document(&store, &format!("doc{i}")).await;
        seed_chunk(&store, &doc, &format!("h{i}"), vec![1.0, 0.01 * i as f32]).await;
    }

    let engine = engine(
        store,
        RetrievalConfig {
            context_chunks: 4,
            ..RetrievalConfig::default()
        },
    );
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();
    assert_eq!(result.citations.len(), 4);
}

#[tokio::test]
async fn other_tenants_chunks_are_invisible() {
    let store = Arc::new(MemoryStore::new());
    let doc = seed_document(&store, "mine").await;
    seed_chunk(&store, &doc, "visible", vec![1.0, 0.0]).await;

    // A foreign tenant's chunk at distance zero must never surface.
    let mut foreign_doc = KnowledgeDocument::new_processing(
        "tenant-2",
        DocumentSource::Text {
            content: "foreign".into(),
        },
    );
    foreign_doc.status = DocumentStatus::Active;
    store.insert_document(&foreign_doc).await.unwrap();
    store
        .upsert_chunks(&[ChunkRecord {
            content_hash: "foreign-chunk".into(),
            document_id: foreign_doc.id.clone(),
            tenant_id: "tenant-2".into(),
            chunk_index: 0,
            content: "secret".into(),
            status: ChunkStatus::Active,
            embedding: vec![1.0, 0.0],
        }])
        .await
        .unwrap();

    let engine = engine(store, RetrievalConfig::default());
    let result = engine.retrieve(TENANT, "menu?").await.unwrap();
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].chunk_hash, "visible");
}
