//! Local PDF text extraction with corruption heuristics.
//!
//! The fast path extracts text on this machine; the caller falls back to a
//! document-understanding collaborator when the output looks corrupted
//! (scanned pages, broken encodings) or the page count exceeds the cap.

use crate::types::ExtractError;

/// Replacement-character ratio above which extracted text is considered
/// corrupted.
const MAX_REPLACEMENT_RATIO: f64 = 0.05;
/// Below this many characters per page the PDF is likely image-only.
const MIN_CHARS_PER_PAGE: usize = 200;

#[derive(Debug, Clone)]
pub struct PdfText {
    pub text: String,
    pub pages: u32,
}

/// Count pages by scanning for page-object markers.
///
/// Cheap enough to run before committing to full extraction, which is the
/// point: the page cap has to be enforceable without parsing the document.
pub fn count_pages(bytes: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut offset = 0usize;
    while let Some(found) = find(&bytes[offset..], b"/Type") {
        let absolute = offset + found + b"/Type".len();
        let rest = &bytes[absolute..];
        let rest = skip_whitespace(rest);
        if rest.starts_with(b"/Page") && !rest.starts_with(b"/Pages") {
            count += 1;
        }
        offset = absolute;
    }
    count
}

/// Extract text from PDF bytes on a blocking worker thread.
pub async fn extract_pdf_text(bytes: Vec<u8>) -> Result<PdfText, ExtractError> {
    let pages = count_pages(&bytes);
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|err| ExtractError::ExtractFailed(format!("pdf worker panicked: {err}")))?
        .map_err(|err| ExtractError::ExtractFailed(format!("pdf extraction: {err}")))?;
    Ok(PdfText { text, pages })
}

/// Heuristic: does locally extracted text look too broken to use?
pub fn looks_corrupted(extracted: &PdfText) -> bool {
    let total = extracted.text.chars().count();
    if total == 0 {
        return true;
    }
    let replacements = extracted
        .text
        .chars()
        .filter(|c| *c == char::REPLACEMENT_CHARACTER)
        .count();
    if replacements as f64 / total as f64 > MAX_REPLACEMENT_RATIO {
        return true;
    }
    let pages = extracted.pages.max(1) as usize;
    total / pages < MIN_CHARS_PER_PAGE
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}
