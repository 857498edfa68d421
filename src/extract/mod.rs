//! Turning untrusted sources into normalized plain text.
//!
//! * [`classify`] — the extraction outcome taxonomy and blocking detection.
//! * [`html`] — static tier (selector-driven text extraction).
//! * [`embedded`] — embedded app-state/structured-data tier.
//! * [`tiered`] — cheapest-first tier orchestration.
//! * [`pdf`] — local PDF text extraction and corruption heuristics.
//! * [`document`] — dispatch by source kind into one normalized result.

pub mod classify;
pub mod document;
pub mod embedded;
pub mod html;
pub mod pdf;
pub mod tiered;

pub use classify::{classify_blocking, PageExtraction};
pub use document::{normalize_text, DocumentExtractor, ExtractedDocument};
pub use embedded::{extract_embedded_items, parse_lenient, EmbeddedExtraction};
pub use tiered::TieredExtractor;
