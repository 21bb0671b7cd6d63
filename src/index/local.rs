//! Disk-backed local index
//!
//! Keeps every document in memory and persists the full set to a JSON file
//! after each mutation. Intended for self-contained runs and tests; the
//! managed backend in `qdrant.rs` serves larger corpora. Insertion order is
//! preserved, which is also the tie-break order on equal similarity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use async_trait::async_trait;

use super::{round_similarity, IndexedDocument, ScoredDocument, SourceType, VectorIndex};
use crate::errors::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    documents: Vec<IndexedDocument>,
}

impl IndexState {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }
}

/// Local vector index with optional JSON persistence
pub struct LocalIndex {
    state: RwLock<IndexState>,
    path: Option<PathBuf>,
}

impl LocalIndex {
    /// Create an in-memory index with no persistence
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            path: None,
        }
    }

    /// Open a disk-backed index, loading any previously persisted documents
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let state: IndexState = serde_json::from_str(&contents)?;
            info!(documents = state.documents.len(), path = %path.display(), "local index loaded");
            state
        } else {
            IndexState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string(state)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Number of stored documents across all companies
    pub fn len(&self) -> usize {
        self.state.read().expect("index lock poisoned").documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn upsert(&self, records: Vec<IndexedDocument>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let mut state = self.state.write().expect("index lock poisoned");
        for record in records {
            match state.position(&record.id) {
                Some(pos) => state.documents[pos] = record,
                None => state.documents.push(record),
            }
        }
        self.persist(&state)?;
        Ok(count)
    }

    async fn query(
        &self,
        embedding: &[f32],
        company: &str,
        source_types: Option<&[SourceType]>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let state = self.state.read().expect("index lock poisoned");
        let mut hits: Vec<ScoredDocument> = state
            .documents
            .iter()
            .filter(|d| d.company == company)
            .filter(|d| source_types.map_or(true, |types| types.contains(&d.source_type)))
            .map(|d| ScoredDocument {
                id: d.id.clone(),
                company: d.company.clone(),
                source_type: d.source_type,
                content: d.content.clone(),
                metadata: d.metadata.clone(),
                image_url: d.image_url.clone(),
                similarity: round_similarity(cosine_similarity(embedding, &d.embedding)),
            })
            .collect();

        // Stable sort keeps insertion order on ties
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn stats(&self, company: &str) -> Result<HashMap<SourceType, usize>> {
        let state = self.state.read().expect("index lock poisoned");
        let mut counts: HashMap<SourceType, usize> =
            SourceType::ALL.iter().map(|st| (*st, 0)).collect();
        for doc in state.documents.iter().filter(|d| d.company == company) {
            *counts.entry(doc.source_type).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn doc(company: &str, source_type: SourceType, content: &str, embedding: Vec<f32>) -> IndexedDocument {
        IndexedDocument::new(company, source_type, content, embedding, HashMap::new(), None)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = LocalIndex::in_memory();
        let record = doc("Acme", SourceType::Patent, "Targeting system", vec![1.0, 0.0]);
        index.upsert(vec![record.clone()]).await.unwrap();
        index.upsert(vec![record]).await.unwrap();
        assert_eq!(index.len(), 1);
        let stats = index.stats("Acme").await.unwrap();
        assert_eq!(stats[&SourceType::Patent], 1);
    }

    #[tokio::test]
    async fn test_stats_reports_all_known_types() {
        let index = LocalIndex::in_memory();
        index
            .upsert(vec![doc("Acme", SourceType::Patent, "P", vec![1.0, 0.0])])
            .await
            .unwrap();
        let stats = index.stats("Acme").await.unwrap();
        assert_eq!(stats[&SourceType::Patent], 1);
        assert_eq!(stats[&SourceType::News], 0);
        assert_eq!(stats[&SourceType::ProductImage], 0);
        // Unknown company: zeros, never missing keys
        let stats = index.stats("Nobody").await.unwrap();
        assert_eq!(stats.len(), 3);
        assert!(stats.values().all(|&v| v == 0));
    }

    #[tokio::test]
    async fn test_query_filters_company_and_type() {
        let index = LocalIndex::in_memory();
        index
            .upsert(vec![
                doc("Acme", SourceType::Patent, "acme patent", vec![1.0, 0.0]),
                doc("Acme", SourceType::News, "acme news", vec![1.0, 0.0]),
                doc("Zenith", SourceType::Patent, "zenith patent", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index
            .query(&[1.0, 0.0], "Acme", Some(&[SourceType::Patent]), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].company, "Acme");
        assert_eq!(hits[0].source_type, SourceType::Patent);

        let hits = index.query(&[1.0, 0.0], "Acme", None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.company == "Acme"));
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = LocalIndex::in_memory();
        index
            .upsert(vec![
                doc("Acme", SourceType::News, "orthogonal", vec![0.0, 1.0]),
                doc("Acme", SourceType::News, "aligned", vec![1.0, 0.0]),
                doc("Acme", SourceType::News, "opposite", vec![-1.0, 0.0]),
            ])
            .await
            .unwrap();
        let hits = index.query(&[1.0, 0.0], "Acme", None, 10).await.unwrap();
        assert_eq!(hits[0].content, "aligned");
        assert_eq!(hits[0].similarity, 1.0);
        assert_eq!(hits[1].content, "orthogonal");
        assert_eq!(hits[2].content, "opposite");
        assert_eq!(hits[2].similarity, -1.0);
    }

    #[tokio::test]
    async fn test_query_respects_top_k() {
        let index = LocalIndex::in_memory();
        let records = (0..10)
            .map(|i| doc("Acme", SourceType::News, &format!("doc {}", i), vec![1.0, i as f32 * 0.1]))
            .collect();
        index.upsert(records).await.unwrap();
        let hits = index.query(&[1.0, 0.0], "Acme", None, 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_metadata_survives_round_trip() {
        let index = LocalIndex::in_memory();
        let mut meta = HashMap::new();
        meta.insert("patent_id".to_string(), Value::from("EP123"));
        let record = IndexedDocument::new(
            "Acme",
            SourceType::Patent,
            "content",
            vec![1.0],
            meta,
            Some("https://img.example/1.png".to_string()),
        );
        index.upsert(vec![record]).await.unwrap();
        let hits = index.query(&[1.0], "Acme", None, 1).await.unwrap();
        assert_eq!(hits[0].metadata["patent_id"], Value::from("EP123"));
        assert_eq!(hits[0].image_url.as_deref(), Some("https://img.example/1.png"));
    }

    #[tokio::test]
    async fn test_disk_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        {
            let index = LocalIndex::open(&path).unwrap();
            index
                .upsert(vec![doc("Acme", SourceType::Patent, "persisted", vec![1.0, 0.0])])
                .await
                .unwrap();
        }
        let reopened = LocalIndex::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.query(&[1.0, 0.0], "Acme", None, 5).await.unwrap();
        assert_eq!(hits[0].content, "persisted");
    }
}
