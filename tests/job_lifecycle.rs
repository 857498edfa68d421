//! Ingest job state machine: idempotent submission, claim, review, apply.

use std::sync::Arc;
use std::time::Duration;

use loresmith::config::{FetchLimits, GuardPolicy, IngestionLimits, JobLimits};
use loresmith::extract::{DocumentExtractor, TieredExtractor};
use loresmith::fetch::{GuardedFetcher, UrlGuard};
use loresmith::jobs::{IngestSource, JobOutcome, JobRunner, JobStatus, ProposalStatus};
use loresmith::providers::mocks::{
    MemoryBlobStorage, MockGenerationProvider, MockRefreshNotifier, MockVisionProvider,
};
use loresmith::stores::{KnowledgeStore, MemoryStore};

const TENANT: &str = "tenant-1";
const MENU_JSON: &str = r#"{"items":[
    {"name":"Espresso","description":"double shot","price_cents":350,"currency":"USD","category":"drinks"},
    {"name":"Cortado","price_cents":425,"currency":"USD"},
    {"name":"Day-old pastry","description":null,"price_cents":null,"currency":"USD","category":"bakery"}
]}"#;

fn runner(store: Arc<MemoryStore>, generation: MockGenerationProvider) -> JobRunner {
    let storage = Arc::new(MemoryBlobStorage::new());
    storage.put("tenants/t1/menu-board.png", vec![0x89, b'P', b'N', b'G']);
    let fetcher = GuardedFetcher::new(UrlGuard::new(GuardPolicy::default()), FetchLimits::default())
        .expect("client builds");
    let extractor = DocumentExtractor::new(
        fetcher,
        TieredExtractor::new(40),
        Arc::new(MockVisionProvider::with_text(
            "Menu board: Espresso 3.50 double shot, Cortado 4.25, Day-old pastry.",
        )),
        storage,
        IngestionLimits::default(),
    );
    JobRunner::new(
        store,
        Arc::new(extractor),
        Arc::new(generation),
        JobLimits::default(),
    )
}

fn image_sources() -> Vec<IngestSource> {
    vec![IngestSource::Image {
        storage_path: "tenants/t1/menu-board.png".into(),
    }]
}

#[tokio::test]
async fn duplicate_submissions_reuse_the_open_job() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(store.clone(), MockGenerationProvider::with_responses(vec![]));

    let first = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let second = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    assert_eq!(first.id, second.id, "open job is reused");

    // Different sources are a different job.
    let other = runner
        .submit(
            TENANT,
            "target-1",
            "menu_items",
            vec![IngestSource::Url {
                url: "https://cafe.example/menu".into(),
            }],
        )
        .await
        .unwrap();
    assert_ne!(first.id, other.id);
}

#[tokio::test]
async fn processing_parks_a_proposal_for_review() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec![MENU_JSON]),
    );

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let outcome = runner.process(TENANT, &job.id).await.unwrap();

    let JobOutcome::NeedsReview { proposal_id } = outcome else {
        panic!("expected NeedsReview, got {outcome:?}");
    };

    let loaded = store.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::NeedsReview);
    assert_eq!(loaded.proposal_id.as_deref(), Some(proposal_id.as_str()));

    let proposal = store
        .get_proposal(TENANT, &proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Proposed);
    assert_eq!(proposal.items.len(), 3);
    assert_eq!(
        proposal.warnings,
        vec!["1 item(s) have no price".to_string()],
        "missing price is flagged for the reviewer"
    );

    // Redelivery of the same trigger is a no-op.
    let again = runner.process(TENANT, &job.id).await.unwrap();
    assert_eq!(again, JobOutcome::Skipped);
}

#[tokio::test]
async fn malformed_generation_fails_the_job_without_a_proposal() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec!["Sorry, I can't find any items here."]),
    );

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let err = runner.process(TENANT, &job.id).await.unwrap_err();
    assert_eq!(err.to_structured().code, "malformed_generation");

    let loaded = store.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Failed);
    assert!(loaded.proposal_id.is_none());
    assert_eq!(loaded.error.unwrap().code, "malformed_generation");
}

#[tokio::test]
async fn terminal_jobs_release_the_idempotency_key() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec!["not json at all"]),
    );

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let _ = runner.process(TENANT, &job.id).await;

    let fresh = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    assert_ne!(job.id, fresh.id, "a failed job no longer holds the key");
}

#[tokio::test]
async fn applying_a_proposal_is_atomic_and_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(MockRefreshNotifier::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec![MENU_JSON]),
    )
    .with_notifier(notifier.clone());

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let JobOutcome::NeedsReview { proposal_id } = runner.process(TENANT, &job.id).await.unwrap()
    else {
        panic!("expected NeedsReview");
    };

    let applied = runner.apply(TENANT, &proposal_id).await.unwrap();
    assert_eq!(applied.item_ids.len(), 3);
    assert_eq!(store.target_items().len(), 3);

    // Re-applying writes the same deterministic ids, no duplicates.
    let reapplied = runner.apply(TENANT, &proposal_id).await.unwrap();
    assert_eq!(applied.item_ids, reapplied.item_ids);
    assert_eq!(store.target_items().len(), 3);

    let loaded = store.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Applied);
    let proposal = store
        .get_proposal(TENANT, &proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Applied);

    // The refresh signal is best-effort but does fire on success.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!notifier.notifications().is_empty());
}

#[tokio::test]
async fn failing_refresh_signal_does_not_affect_apply() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec![MENU_JSON]),
    )
    .with_notifier(Arc::new(MockRefreshNotifier::failing()));

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let JobOutcome::NeedsReview { proposal_id } = runner.process(TENANT, &job.id).await.unwrap()
    else {
        panic!("expected NeedsReview");
    };

    let applied = runner.apply(TENANT, &proposal_id).await.unwrap();
    assert_eq!(applied.item_ids.len(), 3);
    let loaded = store.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Applied);
}

#[tokio::test]
async fn rejecting_a_proposal_fails_the_job_with_the_reason() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec![MENU_JSON]),
    );

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let JobOutcome::NeedsReview { proposal_id } = runner.process(TENANT, &job.id).await.unwrap()
    else {
        panic!("expected NeedsReview");
    };

    runner
        .reject(TENANT, &proposal_id, "prices look stale")
        .await
        .unwrap();

    let proposal = store
        .get_proposal(TENANT, &proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Rejected);
    let loaded = store.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Failed);
    let error = loaded.error.unwrap();
    assert_eq!(error.code, "proposal_rejected");
    assert!(error.message.contains("prices look stale"));

    // No items reached the target collection.
    assert!(store.target_items().is_empty());
}

#[tokio::test]
async fn empty_source_lists_are_refused() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(store, MockGenerationProvider::with_responses(vec![]));
    let err = runner
        .submit(TENANT, "target-1", "menu_items", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.to_structured().code, "invalid_input");
}

#[tokio::test]
async fn zero_item_extractions_warn_the_reviewer() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(
        store.clone(),
        MockGenerationProvider::with_responses(vec![r#"{"items":[]}"#]),
    );

    let job = runner
        .submit(TENANT, "target-1", "menu_items", image_sources())
        .await
        .unwrap();
    let JobOutcome::NeedsReview { proposal_id } = runner.process(TENANT, &job.id).await.unwrap()
    else {
        panic!("expected NeedsReview");
    };

    let proposal = store
        .get_proposal(TENANT, &proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert!(proposal.items.is_empty());
    assert_eq!(
        proposal.warnings,
        vec!["no items were extracted from the sources".to_string()]
    );
}
