//! Specialized patent chunking
//!
//! Patents chunk badly with the generic splitter: claims are numbered legal
//! clauses that lose meaning when cut mid-clause, and descriptions are long
//! runs of numbered paragraphs interspersed with figure captions. This module
//! produces one header chunk (identifier + abstract), one chunk per claim,
//! and grouped description chunks split at recognized section headings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::{chunk_text, Chunk};

/// Claims longer than this are re-chunked with the generic splitter
const CLAIM_CHUNK_CEILING: usize = 1800;
/// Greedy description grouping stops at this many bytes
const DESCRIPTION_GROUP_CEILING: usize = 1200;
/// Paragraphs shorter than this are discarded as noise
const MIN_PARAGRAPH_LEN: usize = 40;
/// A paragraph at most this long that names a section keyword is a heading
const HEADING_MAX_LEN: usize = 80;

/// Section keywords that force a new description group when they appear in a
/// short paragraph
const SECTION_KEYWORDS: &[&str] = &[
    "TECHNICAL FIELD",
    "FIELD OF THE INVENTION",
    "BACKGROUND",
    "SUMMARY",
    "BRIEF DESCRIPTION",
    "DETAILED DESCRIPTION",
    "ADVANTAGEOUS EFFECTS",
    "INDUSTRIAL APPLICABILITY",
];

fn claim_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+)\.\s+").unwrap())
}

fn paragraph_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // EPO-style paragraph numbering: [0001], [0023], ...
    RE.get_or_init(|| Regex::new(r"^\s*\[\d{1,5}\]\s*").unwrap())
}

fn figure_caption_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*fig(s|ure)?s?\.?\s*\d").unwrap())
}

/// A pre-fetched patent record, as produced by the patent-office fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatentRecord {
    pub doc_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub matched_product_name: Option<String>,
}

impl PatentRecord {
    fn base_metadata(&self, company: &str) -> HashMap<String, Value> {
        let mut meta: HashMap<String, Value> = HashMap::new();
        meta.insert("patent_id".to_string(), Value::from(self.doc_id.clone()));
        meta.insert("company_name".to_string(), Value::from(company));
        meta.insert("source_type".to_string(), Value::from("patent"));
        if let Some(title) = &self.title {
            meta.insert("title".to_string(), Value::from(title.clone()));
        }
        if let Some(product) = &self.matched_product_name {
            meta.insert("product".to_string(), Value::from(product.clone()));
        }
        meta
    }
}

/// Chunk a patent record into header, per-claim, and description chunks.
///
/// Chunk indexes are re-assigned to be contiguous across the whole patent.
pub fn chunk_patent(patent: &PatentRecord, company: &str) -> Vec<Chunk> {
    let base_meta = patent.base_metadata(company);
    let mut chunks = Vec::new();

    // Header: identifier + abstract in one chunk
    if let Some(abstract_text) = &patent.abstract_text {
        if !abstract_text.trim().is_empty() {
            let header = format!("Patent {}\n\nAbstract: {}", patent.doc_id, abstract_text.trim());
            let mut meta = base_meta.clone();
            meta.insert("section".to_string(), Value::from("abstract"));
            chunks.extend(chunk_text(&header, 2000, 0, &meta));
        }
    }

    chunks.extend(chunk_claims(patent, &base_meta));
    chunks.extend(chunk_description(patent, &base_meta));

    // Re-index: one contiguous sequence for the whole patent
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = i;
        chunk
            .metadata
            .insert("chunk_index".to_string(), Value::from(i as u64));
    }

    chunks
}

/// Split the claims text on line-leading claim numbers; each numbered span
/// becomes its own chunk, re-chunked generically only when oversized.
fn chunk_claims(patent: &PatentRecord, base_meta: &HashMap<String, Value>) -> Vec<Chunk> {
    if patent.claims.is_empty() {
        return Vec::new();
    }
    let claims_text = patent.claims.join("\n");

    let mut spans: Vec<(Option<u64>, String)> = Vec::new();
    let matches: Vec<_> = claim_number_re().captures_iter(&claims_text).collect();

    if matches.is_empty() {
        spans.push((None, claims_text.clone()));
    } else {
        // Preamble before the first numbered claim, if any
        let first_start = matches[0].get(0).unwrap().start();
        if claims_text[..first_start].trim().len() >= MIN_PARAGRAPH_LEN {
            spans.push((None, claims_text[..first_start].to_string()));
        }
        for (i, caps) in matches.iter().enumerate() {
            let whole = caps.get(0).unwrap();
            let number: u64 = caps[1].parse().unwrap_or(0);
            let end = matches
                .get(i + 1)
                .map(|next| next.get(0).unwrap().start())
                .unwrap_or(claims_text.len());
            let body = claims_text[whole.start()..end].trim().to_string();
            if !body.is_empty() {
                spans.push((Some(number), body));
            }
        }
    }

    let mut chunks = Vec::new();
    for (number, span) in spans {
        let mut meta = base_meta.clone();
        meta.insert("section".to_string(), Value::from("claims"));
        if let Some(n) = number {
            meta.insert("claim_number".to_string(), Value::from(n));
        }
        if span.len() > CLAIM_CHUNK_CEILING {
            chunks.extend(chunk_text(&span, super::DEFAULT_CHUNK_SIZE, super::DEFAULT_OVERLAP, &meta));
        } else {
            chunks.push(Chunk {
                text: span.trim().to_string(),
                metadata: meta,
                index: 0,
            });
        }
    }
    chunks
}

/// Returns the matched section keyword when a short paragraph is a heading
fn section_heading(paragraph: &str) -> Option<&'static str> {
    let trimmed = paragraph.trim();
    if trimmed.len() > HEADING_MAX_LEN {
        return None;
    }
    let upper = trimmed.to_uppercase();
    SECTION_KEYWORDS.iter().copied().find(|kw| upper.contains(kw))
}

/// Filter description paragraphs and greedily group them into bounded chunks.
fn chunk_description(patent: &PatentRecord, base_meta: &HashMap<String, Value>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut group = String::new();
    let mut section_label: Option<String> = None;

    let mut flush = |group: &mut String, label: &Option<String>, chunks: &mut Vec<Chunk>| {
        if group.trim().is_empty() {
            group.clear();
            return;
        }
        let mut meta = base_meta.clone();
        meta.insert("section".to_string(), Value::from("description"));
        if let Some(label) = label {
            meta.insert("section_label".to_string(), Value::from(label.clone()));
        }
        chunks.push(Chunk {
            text: group.trim().to_string(),
            metadata: meta,
            index: 0,
        });
        group.clear();
    };

    for raw in &patent.description {
        let stripped = paragraph_tag_re().replace(raw, "");
        let paragraph = stripped.trim();

        if let Some(keyword) = section_heading(paragraph) {
            flush(&mut group, &section_label, &mut chunks);
            section_label = Some(keyword.to_string());
            continue;
        }
        if paragraph.len() < MIN_PARAGRAPH_LEN || figure_caption_re().is_match(paragraph) {
            continue;
        }

        if group.len() + paragraph.len() > DESCRIPTION_GROUP_CEILING && !group.is_empty() {
            flush(&mut group, &section_label, &mut chunks);
        }
        if !group.is_empty() {
            group.push('\n');
        }
        group.push_str(paragraph);
    }
    flush(&mut group, &section_label, &mut chunks);

    chunks
}
