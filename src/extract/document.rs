//! Source-kind dispatch: one normalized-text result for every source.
//!
//! `text` is returned verbatim (normalized), `url` goes through the guarded
//! fetcher and extraction tiers, `pdf` tries fast local extraction before
//! the document-understanding collaborator, `image` always delegates to it,
//! and `file` is sniffed into one of the above. The enum is closed; adding a
//! kind is a compile error until every match arm handles it.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::config::IngestionLimits;
use crate::extract::classify::PageExtraction;
use crate::extract::html::{extract_static_text, page_title, same_origin_links};
use crate::extract::pdf::{count_pages, extract_pdf_text, looks_corrupted};
use crate::extract::tiered::TieredExtractor;
use crate::fetch::GuardedFetcher;
use crate::providers::{BlobStorage, VisionProvider};
use crate::stores::DocumentSource;
use crate::types::ExtractError;

/// Keywords that make a same-origin link worth following when the primary
/// page was thin. Catalog pages hide behind exactly these words.
const CANDIDATE_KEYWORDS: &[&str] = &[
    "menu", "price", "pricing", "service", "services", "product", "products", "catalog", "rates",
    "offerings",
];

/// Primary pages shorter than `min_meaningful_chars` times this factor
/// trigger candidate-link supplementation.
const THIN_PAGE_FACTOR: usize = 3;

/// Hard ceiling on PDF pages, past which even the collaborator fallback is
/// refused.
const PDF_HARD_PAGE_FACTOR: u32 = 4;

const PDF_TRANSCRIBE_PROMPT: &str = "Transcribe all text content from this document. \
    Preserve item names, prices, and descriptions exactly as written. \
    Output plain text only.";

const IMAGE_TRANSCRIBE_PROMPT: &str = "Transcribe all readable text in this image. \
    Preserve item names, prices, and descriptions exactly as written. \
    Output plain text only.";

/// Normalized text extracted from one source.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    /// Human-readable origin used in citations.
    pub source_name: String,
    pub mime_type: Option<String>,
    pub page_count: Option<u32>,
}

/// Dispatches extraction by source kind.
pub struct DocumentExtractor {
    fetcher: GuardedFetcher,
    tiered: TieredExtractor,
    vision: Arc<dyn VisionProvider>,
    storage: Arc<dyn BlobStorage>,
    limits: IngestionLimits,
}

impl DocumentExtractor {
    pub fn new(
        fetcher: GuardedFetcher,
        tiered: TieredExtractor,
        vision: Arc<dyn VisionProvider>,
        storage: Arc<dyn BlobStorage>,
        limits: IngestionLimits,
    ) -> Self {
        Self {
            fetcher,
            tiered,
            vision,
            storage,
            limits,
        }
    }

    /// Extract normalized text for one source descriptor.
    pub async fn extract(&self, source: &DocumentSource) -> Result<ExtractedDocument, ExtractError> {
        match source {
            DocumentSource::Text { content } => {
                if content.trim().is_empty() {
                    return Err(ExtractError::MissingSourceField("content"));
                }
                Ok(ExtractedDocument {
                    text: normalize_text(content),
                    source_name: "inline text".into(),
                    mime_type: Some("text/plain".into()),
                    page_count: None,
                })
            }
            DocumentSource::Url { url } => self.extract_url(url).await,
            DocumentSource::Pdf { storage_path } => self.extract_pdf(storage_path).await,
            DocumentSource::Image { storage_path } => self.extract_image(storage_path).await,
            DocumentSource::File { storage_path } => self.extract_file(storage_path).await,
        }
    }

    async fn extract_url(&self, raw: &str) -> Result<ExtractedDocument, ExtractError> {
        if raw.trim().is_empty() {
            return Err(ExtractError::MissingSourceField("url"));
        }
        let url = Url::parse(raw)
            .map_err(|err| ExtractError::ExtractFailed(format!("invalid url '{raw}': {err}")))?;

        let page = self.fetcher.fetch(&url).await?;
        let html = page.text();
        let outcome = self.tiered.extract(&page).await;

        let mut text = match &outcome {
            PageExtraction::StaticOk { text }
            | PageExtraction::EmbeddedJsonOk { text }
            | PageExtraction::HeadlessOk { text } => text.clone(),
            PageExtraction::Blocked403
            | PageExtraction::RateLimited429
            | PageExtraction::CaptchaChallenge => {
                return Err(ExtractError::Blocked {
                    classification: outcome.label(),
                });
            }
            PageExtraction::JsShellDetected | PageExtraction::NoItemsFound => {
                return Err(ExtractError::NoContent {
                    classification: outcome.label(),
                });
            }
            PageExtraction::ParseError { message } => {
                return Err(ExtractError::ExtractFailed(message.clone()));
            }
        };

        // Multi-page catalogs: a thin landing page often links to the real
        // content. Follow a few same-origin, keyword-relevant links; this is
        // not general crawling.
        if text.chars().count() < self.limits.min_meaningful_chars * THIN_PAGE_FACTOR {
            for candidate in self.candidate_links(&html, &page.final_url) {
                match self.fetch_candidate(&candidate).await {
                    Some(extra) => {
                        text.push_str("\n\n");
                        text.push_str(&extra);
                    }
                    None => continue,
                }
            }
        }

        let source_name = page_title(&html).unwrap_or_else(|| {
            page.final_url
                .host_str()
                .unwrap_or("web page")
                .to_string()
        });

        Ok(ExtractedDocument {
            text: normalize_text(&text),
            source_name,
            mime_type: page.content_type.clone(),
            page_count: None,
        })
    }

    fn candidate_links(&self, html: &str, base: &Url) -> Vec<Url> {
        let mut scored: Vec<(u32, Url)> = same_origin_links(html, base)
            .into_iter()
            .filter_map(|(link, anchor_text)| {
                let haystack = format!(
                    "{} {}",
                    anchor_text.to_lowercase(),
                    link.path().to_lowercase()
                );
                let score = CANDIDATE_KEYWORDS
                    .iter()
                    .filter(|keyword| haystack.contains(*keyword))
                    .count() as u32;
                (score > 0).then_some((score, link))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        let mut seen = std::collections::HashSet::new();
        scored
            .into_iter()
            .map(|(_, link)| link)
            .filter(|link| seen.insert(link.as_str().to_string()))
            .take(self.limits.max_candidate_links)
            .collect()
    }

    async fn fetch_candidate(&self, url: &Url) -> Option<String> {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(err) => {
                debug!(url = %url, error = %err, "candidate link fetch failed");
                return None;
            }
        };
        extract_static_text(&page.text(), self.limits.min_meaningful_chars)
    }

    async fn extract_pdf(&self, storage_path: &str) -> Result<ExtractedDocument, ExtractError> {
        if storage_path.trim().is_empty() {
            return Err(ExtractError::MissingSourceField("storage_path"));
        }
        let bytes = self.storage.read(storage_path).await?;
        let pages = count_pages(&bytes);

        if pages > self.limits.max_pdf_pages * PDF_HARD_PAGE_FACTOR {
            return Err(ExtractError::TooManyPages {
                pages,
                limit: self.limits.max_pdf_pages * PDF_HARD_PAGE_FACTOR,
            });
        }

        let local = if pages <= self.limits.max_pdf_pages {
            match extract_pdf_text(bytes.clone()).await {
                Ok(extracted) if !looks_corrupted(&extracted) => Some(extracted),
                Ok(extracted) => {
                    debug!(
                        path = storage_path,
                        pages = extracted.pages,
                        chars = extracted.text.len(),
                        "local pdf text looks corrupted, delegating"
                    );
                    None
                }
                Err(err) => {
                    warn!(path = storage_path, error = %err, "local pdf extraction failed");
                    None
                }
            }
        } else {
            None
        };

        let (text, page_count) = match local {
            Some(extracted) => (extracted.text, extracted.pages),
            None => {
                let described = self
                    .vision
                    .describe(&bytes, "application/pdf", PDF_TRANSCRIBE_PROMPT)
                    .await?;
                (described, pages)
            }
        };

        Ok(ExtractedDocument {
            text: normalize_text(&text),
            source_name: file_name(storage_path),
            mime_type: Some("application/pdf".into()),
            page_count: Some(page_count),
        })
    }

    async fn extract_image(&self, storage_path: &str) -> Result<ExtractedDocument, ExtractError> {
        if storage_path.trim().is_empty() {
            return Err(ExtractError::MissingSourceField("storage_path"));
        }
        let bytes = self.storage.read(storage_path).await?;
        let mime = sniff_image_mime(&bytes);
        let text = self
            .vision
            .describe(&bytes, mime, IMAGE_TRANSCRIBE_PROMPT)
            .await?;
        Ok(ExtractedDocument {
            text: normalize_text(&text),
            source_name: file_name(storage_path),
            mime_type: Some(mime.into()),
            page_count: None,
        })
    }

    async fn extract_file(&self, storage_path: &str) -> Result<ExtractedDocument, ExtractError> {
        if storage_path.trim().is_empty() {
            return Err(ExtractError::MissingSourceField("storage_path"));
        }
        let bytes = self.storage.read(storage_path).await?;
        if bytes.starts_with(b"%PDF-") {
            return self.extract_pdf(storage_path).await;
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ExtractError::NoContent {
                classification: "no_items_found",
            });
        }
        Ok(ExtractedDocument {
            text: normalize_text(&text),
            source_name: file_name(storage_path),
            mime_type: Some("text/plain".into()),
            page_count: None,
        })
    }
}

/// Line endings unified, runs of blank lines collapsed, edges trimmed.
pub fn normalize_text(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

fn file_name(path: &str) -> String {
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string()
}

fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_unifies_endings_and_collapses_blanks() {
        let input = "first\r\nsecond\r\r\n\n\n\nthird   \n";
        assert_eq!(normalize_text(input), "first\nsecond\n\nthird");
    }

    #[test]
    fn image_mime_sniffing() {
        assert_eq!(sniff_image_mime(&[0x89, b'P', b'N', b'G', 0, 0]), "image/png");
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image_mime(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_image_mime(b"not an image"), "application/octet-stream");
    }

    #[test]
    fn file_names_come_from_the_last_path_segment() {
        assert_eq!(file_name("tenants/t1/uploads/menu.pdf"), "menu.pdf");
        assert_eq!(file_name("menu.pdf"), "menu.pdf");
    }
}
