//! Text chunking for RAG ingestion
//!
//! Splits source documents into bounded, overlapping chunks suitable for
//! embedding and retrieval. Chunk identity is positional: every chunk carries
//! a zero-based contiguous index within its originating document.

pub mod patent;

pub use patent::{chunk_patent, PatentRecord};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A bounded contiguous slice of a document, tagged with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: HashMap<String, Value>,
    pub index: usize,
}

/// Default target size in characters for generic chunking
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap in characters between adjacent chunks
pub const DEFAULT_OVERLAP: usize = 150;

/// Snap a byte offset down to the nearest UTF-8 character boundary
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Split text into overlapping chunks.
///
/// Slices are `target_size` bytes long; when a slice does not reach the end
/// of the text, it is truncated at the last sentence boundary (`". "`) past
/// its midpoint so chunks avoid mid-sentence breaks. The next slice starts
/// `overlap` bytes before the previous one ended.
///
/// Whitespace-only input yields an empty list, never an empty chunk.
pub fn chunk_text(
    text: &str,
    target_size: usize,
    overlap: usize,
    metadata: &HashMap<String, Value>,
) -> Vec<Chunk> {
    debug_assert!(target_size > 0 && overlap < target_size);

    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut idx = 0usize;

    while start < text.len() {
        let end = floor_char_boundary(text, start + target_size);
        let mut slice = &text[start..end];

        // Break at a sentence boundary past the midpoint, if one exists
        if end < text.len() {
            if let Some(pos) = slice.rfind(". ") {
                if pos > target_size / 2 {
                    slice = &slice[..pos + 1];
                }
            }
        }

        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            let mut meta = metadata.clone();
            meta.insert("chunk_index".to_string(), Value::from(idx as u64));
            chunks.push(Chunk {
                text: trimmed.to_string(),
                metadata: meta,
                index: idx,
            });
            idx += 1;
        }

        // A slice that reached end-of-text is the final chunk; stepping back
        // by the overlap here would re-emit pieces of it.
        if end == text.len() {
            break;
        }

        start += slice.len().saturating_sub(overlap).max(1);
        // The overlap is counted in bytes, so the new start can land inside
        // a multibyte character; snap forward to the next boundary.
        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
    }

    chunks
}

/// A pre-fetched press release or news article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressRelease {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// Chunk a press release for a given company: title and body are combined,
/// then chunked generically.
pub fn chunk_press_release(release: &PressRelease, company: &str) -> Vec<Chunk> {
    let mut meta: HashMap<String, Value> = HashMap::new();
    meta.insert("company_name".to_string(), Value::from(company));
    meta.insert("source_type".to_string(), Value::from("news"));
    meta.insert("title".to_string(), Value::from(release.title.clone()));
    if let Some(url) = &release.url {
        meta.insert("link".to_string(), Value::from(url.clone()));
    }
    if let Some(date) = &release.published_at {
        meta.insert("published_at".to_string(), Value::from(date.clone()));
    }

    let combined = format!("{}\n\n{}", release.title, release.content);
    chunk_text(&combined, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP, &meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_meta() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("", 100, 20, &no_meta()).is_empty());
        assert!(chunk_text("   \n\t  ", 100, 20, &no_meta()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("A short sentence.", 1000, 150, &no_meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short sentence.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_indexes_are_contiguous() {
        let text = "word ".repeat(400);
        let chunks = chunk_text(&text, 200, 40, &no_meta());
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.metadata["chunk_index"], Value::from(i as u64));
        }
    }

    #[test]
    fn test_sentence_boundary_break() {
        // One terminator well past the midpoint: the first chunk must end there.
        let text = format!("{}. {}", "a".repeat(150), "b".repeat(300));
        let chunks = chunk_text(&text, 200, 20, &no_meta());
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[0].text.len(), 151);
    }

    #[test]
    fn test_no_terminator_keeps_fixed_slice() {
        let text = "x".repeat(500);
        let chunks = chunk_text(&text, 200, 50, &no_meta());
        assert_eq!(chunks[0].text.len(), 200);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = format!("Sentence one. {}. Sentence after filler.", "pad ".repeat(100));
        let a = chunk_text(&text, 120, 30, &no_meta());
        let b = chunk_text(&text, 120, 30, &no_meta());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn test_overlap_repeats_content() {
        let text = "abcdefghij ".repeat(50);
        let chunks = chunk_text(&text, 100, 30, &no_meta());
        assert!(chunks.len() > 1);
        // The tail of chunk N reappears at the head of chunk N+1
        let tail: String = chunks[0].text.chars().rev().take(10).collect();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].text.contains(&tail));
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "Ärenden rörande försvarsmateriel. ".repeat(60);
        let chunks = chunk_text(&text, 100, 25, &no_meta());
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_multibyte_overlap_lands_on_boundary() {
        // Overlap arithmetic in bytes must not split a two-byte character
        let text = "öäüöäüöäüö ".repeat(40);
        for overlap in [10, 15, 25, 33] {
            let chunks = chunk_text(&text, 100, overlap, &no_meta());
            assert!(chunks.len() > 1);
        }
    }

    #[test]
    fn test_tail_emitted_exactly_once() {
        // 1900 chars, no sentence terminators: two full slices plus one tail
        let text: String = (0..380).map(|i| format!("w{:03} ", i)).collect();
        assert_eq!(text.len(), 1900);
        let chunks = chunk_text(&text, 1000, 150, &no_meta());
        assert_eq!(chunks.len(), 3);
        // The tail is never re-sliced into shrinking near-duplicates
        for pair in chunks.windows(2) {
            assert!(!pair[0].text.ends_with(pair[1].text.as_str()));
        }
    }

    #[test]
    fn test_press_release_metadata() {
        let release = PressRelease {
            title: "New radar contract".to_string(),
            content: "The company announced a contract.".to_string(),
            url: Some("https://example.com/pr/1".to_string()),
            published_at: None,
        };
        let chunks = chunk_press_release(&release, "SAAB");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["company_name"], Value::from("SAAB"));
        assert_eq!(chunks[0].metadata["source_type"], Value::from("news"));
        assert!(chunks[0].text.starts_with("New radar contract"));
    }
}
