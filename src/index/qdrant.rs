//! Managed Qdrant backend for the vector index
//!
//! One collection holds every company's documents; company and source type
//! live in the point payload and drive query-time filtering. Point ids are
//! UUIDs derived from the deterministic document id, so repeated ingestion
//! of unchanged content overwrites the same point.

use async_trait::async_trait;
use qdrant_client::{
    client::QdrantClient,
    qdrant::{
        condition::ConditionOneOf, r#match::MatchValue, vectors_config::Config,
        with_payload_selector::SelectorOptions, Condition, CountPoints, CreateCollection, Distance,
        FieldCondition, Filter, Match, PointStruct, RepeatedStrings, SearchPoints,
        Value as QdrantValue, VectorParams, VectorsConfig, WithPayloadSelector,
    },
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::warn;

use super::{make_point_uuid, round_similarity, IndexedDocument, ScoredDocument, SourceType, VectorIndex};
use crate::errors::{AnalysisError, Result};

/// Vector index backed by a Qdrant collection
pub struct QdrantIndex {
    client: QdrantClient,
    collection: String,
}

impl QdrantIndex {
    /// Connect to Qdrant and ensure the collection exists with cosine distance
    pub async fn connect(url: &str, collection: &str, dimension: u64) -> Result<Self> {
        let client = QdrantClient::from_url(url)
            .build()
            .map_err(|e| AnalysisError::Retrieval(format!("failed to create Qdrant client: {}", e)))?;

        let collections = client
            .list_collections()
            .await
            .map_err(|e| AnalysisError::Retrieval(format!("failed to list collections: {}", e)))?;
        let exists = collections.collections.iter().any(|c| c.name == collection);

        if !exists {
            client
                .create_collection(&CreateCollection {
                    collection_name: collection.to_string(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(Config::Params(VectorParams {
                            size: dimension,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    AnalysisError::Retrieval(format!("failed to create collection {}: {}", collection, e))
                })?;
        }

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    fn filter(company: &str, source_types: Option<&[SourceType]>) -> Filter {
        let mut must = vec![keyword_condition("company", MatchValue::Keyword(company.to_string()))];
        if let Some(types) = source_types {
            let keywords = types.iter().map(|t| t.as_str().to_string()).collect();
            must.push(keyword_condition(
                "source_type",
                MatchValue::Keywords(RepeatedStrings { strings: keywords }),
            ));
        }
        Filter {
            must,
            ..Default::default()
        }
    }
}

fn keyword_condition(key: &str, value: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(value),
            }),
            ..Default::default()
        })),
    }
}

fn to_payload(doc: &IndexedDocument) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert("doc_id".to_string(), QdrantValue::from(doc.id.clone()));
    payload.insert("company".to_string(), QdrantValue::from(doc.company.clone()));
    payload.insert(
        "source_type".to_string(),
        QdrantValue::from(doc.source_type.as_str().to_string()),
    );
    payload.insert("content".to_string(), QdrantValue::from(doc.content.clone()));
    payload.insert(
        "image_url".to_string(),
        QdrantValue::from(doc.image_url.clone().unwrap_or_default()),
    );
    for (key, value) in &doc.metadata {
        payload.insert(key.clone(), json_to_qdrant_value(value));
    }
    payload
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: Vec<IndexedDocument>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let points: Vec<PointStruct> = records
            .iter()
            .map(|doc| {
                PointStruct::new(
                    make_point_uuid(&doc.id).to_string(),
                    doc.embedding.clone(),
                    to_payload(doc),
                )
            })
            .collect();

        self.client
            .upsert_points_blocking(&self.collection, None, points, None)
            .await
            .map_err(|e| AnalysisError::Retrieval(format!("failed to upsert points: {}", e)))?;
        Ok(count)
    }

    async fn query(
        &self,
        embedding: &[f32],
        company: &str,
        source_types: Option<&[SourceType]>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let search = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection.clone(),
                vector: embedding.to_vec(),
                limit: top_k as u64,
                filter: Some(Self::filter(company, source_types)),
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                ..Default::default()
            })
            .await;

        // Retrieval failures are non-fatal: callers treat no-results as a
        // degraded but valid outcome.
        let search = match search {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, company, "qdrant query failed, returning empty result");
                return Ok(Vec::new());
            }
        };

        let mut hits = Vec::new();
        for point in search.result {
            let payload = point.payload;
            let source_type = match payload.get("source_type").and_then(qdrant_value_to_string) {
                Some(s) => match s.as_str() {
                    "patent" => SourceType::Patent,
                    "news" => SourceType::News,
                    "product_image" => SourceType::ProductImage,
                    other => {
                        warn!(source_type = other, "skipping point with unknown source type");
                        continue;
                    }
                },
                None => continue,
            };
            let image_url = payload
                .get("image_url")
                .and_then(qdrant_value_to_string)
                .filter(|s| !s.is_empty());

            let mut metadata = HashMap::new();
            for (key, value) in &payload {
                if matches!(key.as_str(), "doc_id" | "company" | "source_type" | "content" | "image_url") {
                    continue;
                }
                if let Some(json) = qdrant_to_json_value(value) {
                    metadata.insert(key.clone(), json);
                }
            }

            hits.push(ScoredDocument {
                id: payload
                    .get("doc_id")
                    .and_then(qdrant_value_to_string)
                    .unwrap_or_default(),
                company: payload
                    .get("company")
                    .and_then(qdrant_value_to_string)
                    .unwrap_or_else(|| company.to_string()),
                source_type,
                content: payload
                    .get("content")
                    .and_then(qdrant_value_to_string)
                    .unwrap_or_default(),
                metadata,
                image_url,
                // Qdrant reports cosine similarity directly as the score
                similarity: round_similarity(point.score as f64),
            });
        }
        Ok(hits)
    }

    async fn stats(&self, company: &str) -> Result<HashMap<SourceType, usize>> {
        let mut counts = HashMap::new();
        for source_type in SourceType::ALL {
            let count = self
                .client
                .count(&CountPoints {
                    collection_name: self.collection.clone(),
                    filter: Some(Self::filter(company, Some(&[source_type]))),
                    exact: Some(true),
                    ..Default::default()
                })
                .await
                .map(|response| response.result.map(|r| r.count as usize).unwrap_or(0))
                .unwrap_or(0);
            counts.insert(source_type, count);
        }
        Ok(counts)
    }
}

// Payload value conversions between serde_json and the Qdrant value type
fn json_to_qdrant_value(json: &JsonValue) -> QdrantValue {
    match json {
        JsonValue::String(s) => QdrantValue::from(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                QdrantValue::from(i)
            } else if let Some(f) = n.as_f64() {
                QdrantValue::from(f)
            } else {
                QdrantValue::from(0)
            }
        }
        JsonValue::Bool(b) => QdrantValue::from(*b),
        _ => QdrantValue::from(""),
    }
}

fn qdrant_to_json_value(value: &QdrantValue) -> Option<JsonValue> {
    value.kind.as_ref().and_then(|kind| {
        use qdrant_client::qdrant::value::Kind;
        match kind {
            Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
            Kind::IntegerValue(i) => Some(JsonValue::Number((*i).into())),
            Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
            Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
            _ => None,
        }
    })
}

fn qdrant_value_to_string(value: &QdrantValue) -> Option<String> {
    value.kind.as_ref().and_then(|kind| {
        use qdrant_client::qdrant::value::Kind;
        match kind {
            Kind::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_shape() {
        let filter = QdrantIndex::filter("Acme", Some(&[SourceType::Patent, SourceType::News]));
        assert_eq!(filter.must.len(), 2);
        let filter = QdrantIndex::filter("Acme", None);
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_payload_carries_document_fields() {
        let doc = IndexedDocument::new(
            "Acme",
            SourceType::Patent,
            "claim text",
            vec![0.1, 0.2],
            HashMap::new(),
            Some("https://img.example/1.png".to_string()),
        );
        let payload = to_payload(&doc);
        assert!(payload.contains_key("doc_id"));
        assert!(payload.contains_key("company"));
        assert!(payload.contains_key("source_type"));
        assert!(payload.contains_key("content"));
        assert!(payload.contains_key("image_url"));
    }

    #[tokio::test]
    #[ignore] // Integration test - requires Qdrant
    async fn test_upsert_and_stats_integration() {
        let index = QdrantIndex::connect("http://localhost:6334", "dualwatch_test", 2)
            .await
            .unwrap();
        let doc = IndexedDocument::new(
            "Acme",
            SourceType::Patent,
            "integration doc",
            vec![1.0, 0.0],
            HashMap::new(),
            None,
        );
        index.upsert(vec![doc.clone()]).await.unwrap();
        index.upsert(vec![doc]).await.unwrap();
        let stats = index.stats("Acme").await.unwrap();
        assert_eq!(stats[&SourceType::Patent], 1);
    }
}
