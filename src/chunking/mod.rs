//! Boundary-aware, overlapping character chunking with content-hash dedup.
//!
//! The window walk is deterministic and pure: the same text always produces
//! the same chunks with the same hashes, which is what makes re-ingestion
//! idempotent all the way down to storage keys.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;

/// One chunk of normalized document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Ordinal position within the emitted sequence.
    pub index: usize,
    pub content: String,
    /// SHA-256 of the content, hex-encoded. The chunk's storage identity.
    pub content_hash: String,
    /// Character offset of the window start in the source text.
    pub start_offset: usize,
}

/// SHA-256 hex digest of arbitrary text. Used for chunk identity, document
/// content hashes, and job idempotency keys.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Splits normalized text into overlapping, boundary-aware chunks.
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Walk the text in windows of `chunk_size` characters.
    ///
    /// A window whose edge falls mid-sentence extends to the nearest
    /// following sentence or line boundary within `boundary_lookahead`
    /// characters; otherwise it cuts at the edge. The start advances by
    /// `chunk_size - overlap` so consecutive chunks share context across the
    /// cut. Chunks below `min_chunk_len` are dropped, and identical chunks
    /// within one run collapse to the first occurrence.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let size = self.config.chunk_size.max(1);
        let stride = size.saturating_sub(self.config.overlap).max(1);

        let mut seen = std::collections::HashSet::new();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total {
            let edge = (start + size).min(total);
            let end = if edge < total {
                self.snap_to_boundary(&chars, edge)
            } else {
                edge
            };

            let content: String = chars[start..end].iter().collect();
            let content = content.trim().to_string();

            if content.chars().count() >= self.config.min_chunk_len {
                let hash = content_hash(&content);
                if seen.insert(hash.clone()) {
                    chunks.push(TextChunk {
                        index: chunks.len(),
                        content,
                        content_hash: hash,
                        start_offset: start,
                    });
                }
            }

            if edge >= total {
                break;
            }
            start += stride;
        }

        chunks
    }

    /// Scan forward from the window edge for a sentence or line boundary.
    fn snap_to_boundary(&self, chars: &[char], edge: usize) -> usize {
        let horizon = (edge + self.config.boundary_lookahead).min(chars.len());
        for pos in edge..horizon {
            let c = chars[pos];
            if c == '\n' {
                return pos + 1;
            }
            if matches!(c, '.' | '!' | '?') {
                // Sentence end only when followed by whitespace or EOF;
                // "3.50" must not split.
                let next = chars.get(pos + 1);
                if next.is_none() || next.is_some_and(|n| n.is_whitespace()) {
                    return pos + 1;
                }
            }
        }
        edge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
            boundary_lookahead: 160,
            min_chunk_len: 40,
        }
    }

    fn sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence number {i} talks about the day's menu in a bit of detail."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn hashes_are_stable_and_distinct() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn three_thousand_chars_at_default_sizing_gives_three_chunks() {
        let text: String = "a".repeat(2999) + ".";
        let chunker = Chunker::new(config(1200, 150));
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].start_offset, 1050);
        assert_eq!(chunks[2].start_offset, 2100);
    }

    #[test]
    fn rerunning_yields_identical_hashes() {
        let text = sentences(60);
        let chunker = Chunker::new(config(1200, 150));
        let first: Vec<String> = chunker
            .chunk(&text)
            .into_iter()
            .map(|c| c.content_hash)
            .collect();
        let second: Vec<String> = chunker
            .chunk(&text)
            .into_iter()
            .map(|c| c.content_hash)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn starts_advance_by_stride() {
        let text = sentences(80);
        let chunker = Chunker::new(config(500, 100));
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let advance = pair[1].start_offset - pair[0].start_offset;
            assert_eq!(advance % 400, 0, "starts advance in stride multiples");
            assert!(advance >= 400);
        }
    }

    #[test]
    fn windows_snap_to_sentence_boundaries() {
        let text = sentences(40);
        let chunker = Chunker::new(config(500, 100));
        for chunk in chunker.chunk(&text) {
            let last = chunk.content.chars().last().unwrap();
            // Every window ends either on a snapped boundary or the text end.
            assert!(
                matches!(last, '.' | '!' | '?') || chunk.content.len() >= 500,
                "unexpected chunk tail: {last:?}"
            );
        }
    }

    #[test]
    fn decimal_prices_do_not_split_sentences() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("Item {i} costs 12.50 at the counter today. "));
        }
        let chunker = Chunker::new(config(200, 40));
        for chunk in chunker.chunk(&text) {
            assert!(!chunk.content.ends_with("12."), "split inside a price");
        }
    }

    #[test]
    fn short_noise_is_dropped() {
        let chunker = Chunker::new(config(1200, 150));
        assert!(chunker.chunk("too short").is_empty());
    }

    #[test]
    fn identical_windows_deduplicate() {
        // A page of repeated identical lines produces identical windows.
        let line = "the same line of menu text repeated over and over again\n";
        let text = line.repeat(200);
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: line.len(),
            overlap: 0,
            boundary_lookahead: 0,
            min_chunk_len: 10,
        });
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "Crème brûlée — süß und köstlich. ".repeat(100);
        let chunker = Chunker::new(config(300, 60));
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        for chunk in chunks {
            assert!(chunk.content.chars().count() >= 40);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::new(config(1200, 150));
        assert!(chunker.chunk("").is_empty());
    }
}
