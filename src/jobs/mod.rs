//! Ingest job and proposal records.
//!
//! A job is one attempt to turn an ordered set of sources into structured
//! candidate items for a tenant's catalog-like target. Jobs are
//! deduplicated by an idempotency key over their defining inputs and move
//! through `queued → processing → needs_review → applied | failed`, with
//! `rejected` reached on the linked proposal via explicit reviewer action.

pub mod runner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunking::content_hash;
use crate::stores::DocumentSource;
use crate::types::StructuredError;

pub use runner::{JobOutcome, JobRunner};

/// One source feeding an ingest job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestSource {
    Url { url: String },
    Pdf { storage_path: String },
    Image { storage_path: String },
}

impl IngestSource {
    /// Canonical `kind:value` form used in the idempotency key.
    fn canonical(&self) -> String {
        match self {
            IngestSource::Url { url } => format!("url:{url}"),
            IngestSource::Pdf { storage_path } => format!("pdf:{storage_path}"),
            IngestSource::Image { storage_path } => format!("image:{storage_path}"),
        }
    }
}

impl From<&IngestSource> for DocumentSource {
    fn from(source: &IngestSource) -> Self {
        match source {
            IngestSource::Url { url } => DocumentSource::Url { url: url.clone() },
            IngestSource::Pdf { storage_path } => DocumentSource::Pdf {
                storage_path: storage_path.clone(),
            },
            IngestSource::Image { storage_path } => DocumentSource::Image {
                storage_path: storage_path.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    NeedsReview,
    Applied,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::NeedsReview => "needs_review",
            JobStatus::Applied => "applied",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "needs_review" => Some(JobStatus::NeedsReview),
            "applied" => Some(JobStatus::Applied),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Non-terminal statuses hold the idempotency key; a new submission with
    /// the same key reuses the existing job instead of creating another.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Processing | JobStatus::NeedsReview
        )
    }
}

/// One attempt to turn sources into structured items for a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: String,
    pub tenant_id: String,
    pub target_id: String,
    /// Target collection kind, e.g. `menu_items` or `services`.
    pub kind: String,
    pub sources: Vec<IngestSource>,
    pub idempotency_key: String,
    pub status: JobStatus,
    pub proposal_id: Option<String>,
    pub error: Option<StructuredError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestJob {
    pub fn new(
        tenant_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: impl Into<String>,
        sources: Vec<IngestSource>,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let target_id = target_id.into();
        let kind = kind.into();
        let idempotency_key = idempotency_key(&target_id, &kind, &sources);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            target_id,
            kind,
            sources,
            idempotency_key,
            status: JobStatus::Queued,
            proposal_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic hash over a job's defining inputs. Source order matters:
/// the same set in a different order is a different job.
pub fn idempotency_key(target_id: &str, kind: &str, sources: &[IngestSource]) -> String {
    let mut canonical = format!("{target_id}|{kind}");
    for source in sources {
        canonical.push('|');
        canonical.push_str(&source.canonical());
    }
    content_hash(&canonical)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Applied,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "proposed" => Some(ProposalStatus::Proposed),
            "applied" => Some(ProposalStatus::Applied),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// A structured item extracted from job sources, pending review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CandidateItem {
    /// Deterministic id, so re-applying a proposal upserts instead of
    /// duplicating.
    pub fn deterministic_id(&self, kind: &str) -> String {
        let canonical = format!(
            "{kind}|{}|{}|{}|{}",
            self.name.trim().to_lowercase(),
            self.price_cents.map_or(String::new(), |p| p.to_string()),
            self.currency.trim().to_uppercase(),
            self.category
                .as_deref()
                .map(|c| c.trim().to_lowercase())
                .unwrap_or_default(),
        );
        content_hash(&canonical)
    }
}

/// Output of a completed job: candidate items plus review warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestProposal {
    pub id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub items: Vec<CandidateItem>,
    pub warnings: Vec<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}

impl IngestProposal {
    pub fn new(job: &IngestJob, items: Vec<CandidateItem>, warnings: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            items,
            warnings,
            status: ProposalStatus::Proposed,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<IngestSource> {
        vec![
            IngestSource::Url {
                url: "https://cafe.example/menu".into(),
            },
            IngestSource::Pdf {
                storage_path: "tenants/t1/menu.pdf".into(),
            },
        ]
    }

    #[test]
    fn idempotency_key_is_stable() {
        let a = idempotency_key("target-1", "menu_items", &sources());
        let b = idempotency_key("target-1", "menu_items", &sources());
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_depends_on_every_input() {
        let base = idempotency_key("target-1", "menu_items", &sources());
        assert_ne!(base, idempotency_key("target-2", "menu_items", &sources()));
        assert_ne!(base, idempotency_key("target-1", "services", &sources()));
        let mut reversed = sources();
        reversed.reverse();
        assert_ne!(base, idempotency_key("target-1", "menu_items", &reversed));
    }

    #[test]
    fn item_ids_are_deterministic_and_normalized() {
        let item = CandidateItem {
            name: "  Espresso ".into(),
            description: Some("double shot".into()),
            price_cents: Some(350),
            currency: "usd".into(),
            category: Some("Drinks".into()),
        };
        let same = CandidateItem {
            name: "espresso".into(),
            description: None,
            price_cents: Some(350),
            currency: "USD".into(),
            category: Some("drinks".into()),
        };
        assert_eq!(
            item.deterministic_id("menu_items"),
            same.deterministic_id("menu_items")
        );
        assert_ne!(
            item.deterministic_id("menu_items"),
            item.deterministic_id("services")
        );
    }

    #[test]
    fn open_statuses_hold_the_key() {
        assert!(JobStatus::Queued.is_open());
        assert!(JobStatus::Processing.is_open());
        assert!(JobStatus::NeedsReview.is_open());
        assert!(!JobStatus::Applied.is_open());
        assert!(!JobStatus::Failed.is_open());
    }
}
