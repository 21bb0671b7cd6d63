//! Vector index: document identity, storage contract, and backends
//!
//! Two backends share one call shape: a disk-backed local store for
//! self-contained runs and a managed Qdrant collection for larger corpora.
//! Document ids are content-addressed, so re-ingesting unchanged content is
//! an overwrite with an identical value.

pub mod local;
pub mod qdrant;

pub use local::LocalIndex;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::errors::Result;

/// Category of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Patent,
    News,
    ProductImage,
}

impl SourceType {
    /// All known source types, in the order `stats` reports them
    pub const ALL: [SourceType; 3] = [SourceType::Patent, SourceType::News, SourceType::ProductImage];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Patent => "patent",
            SourceType::News => "news",
            SourceType::ProductImage => "product_image",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document with its embedding and flattened metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub company: String,
    pub source_type: SourceType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, Value>,
    pub image_url: Option<String>,
}

impl IndexedDocument {
    /// Build a document with its deterministic id and scalar-only metadata
    pub fn new(
        company: impl Into<String>,
        source_type: SourceType,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: HashMap<String, Value>,
        image_url: Option<String>,
    ) -> Self {
        let company = company.into();
        let content = content.into();
        let id = make_doc_id(&company, source_type, &content);
        Self {
            id,
            company,
            source_type,
            content,
            embedding,
            metadata: flatten_metadata(metadata),
            image_url,
        }
    }
}

/// A query hit: stored fields plus cosine similarity in [-1, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub company: String,
    pub source_type: SourceType,
    pub content: String,
    pub metadata: HashMap<String, Value>,
    pub image_url: Option<String>,
    pub similarity: f64,
}

/// Storage contract shared by all index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by deterministic id. Returns the count stored.
    async fn upsert(&self, records: Vec<IndexedDocument>) -> Result<usize>;

    /// Nearest-neighbor search filtered by company and optionally source type.
    /// Results are ordered by descending similarity. A backend error degrades
    /// to an empty list; it never aborts the caller.
    async fn query(
        &self,
        embedding: &[f32],
        company: &str,
        source_types: Option<&[SourceType]>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// Stored-document counts per source type for one company. Every known
    /// source type is present in the map, zero when nothing is stored.
    async fn stats(&self, company: &str) -> Result<HashMap<SourceType, usize>>;
}

/// Deterministic document id: SHA-256 over company, source type, and the
/// leading 120 characters of the content, truncated to 24 hex digits.
pub fn make_doc_id(company: &str, source_type: SourceType, content: &str) -> String {
    let prefix: String = content.chars().take(120).collect();
    let key = format!("{}:{}:{}", company, source_type, prefix);
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..24].to_string()
}

/// Derive a stable UUID for backends that only accept UUID point ids
pub fn make_point_uuid(doc_id_key: &str) -> uuid::Uuid {
    let digest = Sha256::digest(doc_id_key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes)
}

/// Index backends only accept scalar metadata values. Arrays become
/// comma-joined strings; any other structure falls back to its JSON text.
pub fn flatten_metadata(metadata: HashMap<String, Value>) -> HashMap<String, Value> {
    metadata
        .into_iter()
        .map(|(k, v)| {
            let flat = match v {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => v,
                Value::Array(items) => {
                    let joined = items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    Value::from(joined)
                }
                Value::Null => Value::from(""),
                other => Value::from(other.to_string()),
            };
            (k, flat)
        })
        .collect()
}

/// Round a similarity to 4 decimal places, the precision the query surface
/// guarantees across backends.
pub fn round_similarity(similarity: f64) -> f64 {
    (similarity * 10_000.0).round() / 10_000.0
}
