//! Cheapest-first orchestration of the extraction tiers.
//!
//! Order: blocking classification → static HTML → embedded data → app-shell
//! detection → rendering collaborator. A full browser render is the most
//! expensive path by an order of magnitude, so it is only consulted when the
//! page is positively identified as a JavaScript shell.

use std::sync::Arc;

use tracing::debug;

use crate::extract::classify::{classify_blocking, PageExtraction};
use crate::extract::embedded::extract_embedded_items;
use crate::extract::html::{extract_static_text, looks_like_app_shell};
use crate::fetch::FetchedPage;
use crate::providers::PageRenderer;

/// Runs the tier chain over fetched pages.
pub struct TieredExtractor {
    /// Below this many characters a tier's output is not meaningful.
    min_meaningful_chars: usize,
    /// Last-resort rendering collaborator; absent in deployments that do not
    /// pay for one.
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl TieredExtractor {
    pub fn new(min_meaningful_chars: usize) -> Self {
        Self {
            min_meaningful_chars,
            renderer: None,
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Classify and extract one fetched page.
    pub async fn extract(&self, page: &FetchedPage) -> PageExtraction {
        let body = page.text();

        if let Some(blocked) = classify_blocking(page.status, &body) {
            debug!(url = %page.final_url, outcome = blocked.label(), "blocking response");
            return blocked;
        }

        if !(200..300).contains(&page.status) {
            return PageExtraction::ParseError {
                message: format!("unexpected status {}", page.status),
            };
        }

        if let Some(text) = extract_static_text(&body, self.min_meaningful_chars) {
            debug!(url = %page.final_url, chars = text.len(), "static tier succeeded");
            return PageExtraction::StaticOk { text };
        }

        if let Some(embedded) = extract_embedded_items(&body) {
            debug!(
                url = %page.final_url,
                items = embedded.item_count,
                low_confidence = embedded.low_confidence,
                "embedded tier succeeded"
            );
            return PageExtraction::EmbeddedJsonOk {
                text: embedded.text,
            };
        }

        if looks_like_app_shell(&body, self.min_meaningful_chars) {
            match &self.renderer {
                Some(renderer) => self.render(renderer.as_ref(), page).await,
                None => PageExtraction::JsShellDetected,
            }
        } else {
            PageExtraction::NoItemsFound
        }
    }

    async fn render(&self, renderer: &dyn PageRenderer, page: &FetchedPage) -> PageExtraction {
        match renderer.render(&page.final_url).await {
            Ok(rendered) => {
                let text = rendered.text.trim().to_string();
                if text.chars().count() >= self.min_meaningful_chars {
                    debug!(url = %page.final_url, chars = text.len(), "rendering tier succeeded");
                    PageExtraction::HeadlessOk { text }
                } else {
                    PageExtraction::NoItemsFound
                }
            }
            Err(err) => PageExtraction::ParseError {
                message: format!("rendering collaborator failed: {err}"),
            },
        }
    }
}
