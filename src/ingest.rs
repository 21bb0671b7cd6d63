//! Bulk ingestion: chunk, embed, and index pre-fetched source documents
//!
//! Input files are JSON produced by the upstream fetchers. Patents arrive
//! already attributed to a company; press releases arrive as a flat feed and
//! are routed to companies by keyword matching, so one article can be
//! indexed for several companies. Ingestion is idempotent: document ids are
//! content-addressed, so re-running a file overwrites identical records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::chunker::{chunk_patent, chunk_press_release, Chunk, PatentRecord, PressRelease};
use crate::embedding::{embed_batch, Embedder};
use crate::errors::{AnalysisError, Result};
use crate::index::{IndexedDocument, SourceType, VectorIndex};

/// A pre-fetched product marketing image with its caption text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImageRecord {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub caption: String,
    pub image_url: String,
}

async fn index_chunks(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    company: &str,
    source_type: SourceType,
    chunks: Vec<Chunk>,
    image_url: Option<&str>,
) -> Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embed_batch(embedder, &texts).await?;

    let documents: Vec<IndexedDocument> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            IndexedDocument::new(
                company,
                source_type,
                chunk.text,
                embedding,
                chunk.metadata,
                image_url.map(str::to_string),
            )
        })
        .collect();

    index.upsert(documents).await
}

/// Ingest one company's patents. Returns the number of chunks indexed.
pub async fn ingest_patents(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    company: &str,
    patents: &[PatentRecord],
) -> Result<usize> {
    let mut stored = 0;
    for patent in patents {
        let chunks = chunk_patent(patent, company);
        stored += index_chunks(index, embedder, company, SourceType::Patent, chunks, None).await?;
    }
    info!(company, patents = patents.len(), chunks = stored, "patents ingested");
    Ok(stored)
}

/// Ingest a patents file mapping company name to its patent records.
pub async fn ingest_patents_file(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, usize>> {
    let patents_by_company = load_patents_file(path)?;
    let mut counts = BTreeMap::new();
    for (company, patents) in &patents_by_company {
        let stored = ingest_patents(index, embedder, company, patents).await?;
        counts.insert(company.clone(), stored);
    }
    Ok(counts)
}

/// Load a patents file without ingesting it.
pub fn load_patents_file(path: impl AsRef<Path>) -> Result<BTreeMap<String, Vec<PatentRecord>>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::Input(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        AnalysisError::Input(format!("malformed patents JSON in {}: {}", path.display(), e))
    })
}

/// Route a flat press feed to companies by case-insensitive keyword match
/// over title and body. An article matching several companies is returned
/// once per company; an article matching none is dropped.
pub fn route_press_releases<'a>(
    releases: &'a [PressRelease],
    keywords_by_company: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<&'a PressRelease>> {
    let mut routed: BTreeMap<String, Vec<&PressRelease>> = BTreeMap::new();
    for release in releases {
        let haystack = format!("{} {}", release.title, release.content).to_lowercase();
        for (company, keywords) in keywords_by_company {
            if keywords.iter().any(|k| haystack.contains(&k.to_lowercase())) {
                routed.entry(company.clone()).or_default().push(release);
            }
        }
    }
    routed
}

/// Ingest a press feed, routing each article to matching companies.
/// Returns chunks indexed per company.
pub async fn ingest_press_releases(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    releases: &[PressRelease],
    keywords_by_company: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, usize>> {
    let routed = route_press_releases(releases, keywords_by_company);
    let mut counts = BTreeMap::new();
    for (company, articles) in routed {
        let mut stored = 0;
        for release in articles {
            let chunks = chunk_press_release(release, &company);
            stored += index_chunks(index, embedder, &company, SourceType::News, chunks, None).await?;
        }
        info!(company, chunks = stored, "press releases ingested");
        counts.insert(company, stored);
    }
    Ok(counts)
}

/// Ingest product marketing images: the caption is the embedded text, the
/// image URL travels alongside for later display.
pub async fn ingest_product_images(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    company: &str,
    images: &[ProductImageRecord],
) -> Result<usize> {
    let mut stored = 0;
    for image in images {
        let content = if image.product.is_empty() {
            image.caption.clone()
        } else {
            format!("{}: {}", image.product, image.caption)
        };
        if content.trim().is_empty() {
            continue;
        }
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("company_name".to_string(), serde_json::Value::from(company));
        metadata.insert(
            "source_type".to_string(),
            serde_json::Value::from("product_image"),
        );
        if !image.product.is_empty() {
            metadata.insert("product".to_string(), serde_json::Value::from(image.product.clone()));
        }
        let chunk = Chunk {
            text: content,
            metadata,
            index: 0,
        };
        stored += index_chunks(
            index,
            embedder,
            company,
            SourceType::ProductImage,
            vec![chunk],
            Some(&image.image_url),
        )
        .await?;
    }
    info!(company, images = images.len(), chunks = stored, "product images ingested");
    Ok(stored)
}

/// Distinct product names per company, collected from patent-to-product
/// matches. Drives the per-product analysis run.
pub fn collect_products(
    patents_by_company: &BTreeMap<String, Vec<PatentRecord>>,
) -> BTreeMap<String, Vec<String>> {
    let mut products: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (company, patents) in patents_by_company {
        let mut names: Vec<String> = patents
            .iter()
            .filter_map(|p| p.matched_product_name.clone())
            .filter(|n| !n.trim().is_empty())
            .collect();
        names.sort();
        names.dedup();
        if !names.is_empty() {
            products.insert(company.clone(), names);
        }
    }
    products
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LocalIndex;
    use async_trait::async_trait;

    struct CountingEmbedder;

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn patent(id: &str, product: Option<&str>) -> PatentRecord {
        PatentRecord {
            doc_id: id.to_string(),
            title: Some("Guidance system".to_string()),
            abstract_text: Some("A guidance system for autonomous platforms.".to_string()),
            claims: vec!["1. A system comprising a sensor and a controller.".to_string()],
            description: Vec::new(),
            matched_product_name: product.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_ingest_patents_counts_chunks() {
        let index = LocalIndex::in_memory();
        let embedder = CountingEmbedder;
        let stored = ingest_patents(&index, &embedder, "Acme", &[patent("EP1", None)])
            .await
            .unwrap();
        // Header chunk + one claim chunk
        assert_eq!(stored, 2);
        let stats = index.stats("Acme").await.unwrap();
        assert_eq!(stats[&SourceType::Patent], 2);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let index = LocalIndex::in_memory();
        let embedder = CountingEmbedder;
        let patents = [patent("EP1", None)];
        ingest_patents(&index, &embedder, "Acme", &patents).await.unwrap();
        ingest_patents(&index, &embedder, "Acme", &patents).await.unwrap();
        let stats = index.stats("Acme").await.unwrap();
        assert_eq!(stats[&SourceType::Patent], 2);
    }

    #[test]
    fn test_press_routing_multi_company() {
        let releases = vec![
            PressRelease {
                title: "Gripen and NLAW in joint exercise".to_string(),
                content: "Details of the exercise.".to_string(),
                url: None,
                published_at: None,
            },
            PressRelease {
                title: "Quarterly earnings".to_string(),
                content: "No product mentions.".to_string(),
                url: None,
                published_at: None,
            },
        ];
        let mut keywords = BTreeMap::new();
        keywords.insert("SAAB".to_string(), vec!["Gripen".to_string()]);
        keywords.insert("Thales".to_string(), vec!["NLAW".to_string()]);

        let routed = route_press_releases(&releases, &keywords);
        assert_eq!(routed["SAAB"].len(), 1);
        assert_eq!(routed["Thales"].len(), 1);
        // The unmatched article appears nowhere
        assert_eq!(routed.values().map(|v| v.len()).sum::<usize>(), 2);
    }

    #[test]
    fn test_press_routing_case_insensitive() {
        let releases = vec![PressRelease {
            title: "GRIPEN deliveries resume".to_string(),
            content: String::new(),
            url: None,
            published_at: None,
        }];
        let mut keywords = BTreeMap::new();
        keywords.insert("SAAB".to_string(), vec!["gripen".to_string()]);
        let routed = route_press_releases(&releases, &keywords);
        assert_eq!(routed["SAAB"].len(), 1);
    }

    #[tokio::test]
    async fn test_product_images_carry_url() {
        let index = LocalIndex::in_memory();
        let embedder = CountingEmbedder;
        let images = vec![ProductImageRecord {
            product: "Archer".to_string(),
            caption: "Self-propelled artillery on display.".to_string(),
            image_url: "https://example.com/archer.jpg".to_string(),
        }];
        let stored = ingest_product_images(&index, &embedder, "BAE", &images).await.unwrap();
        assert_eq!(stored, 1);

        let query = embedder.embed("Archer artillery").await.unwrap();
        let hits = index
            .query(&query, "BAE", Some(&[SourceType::ProductImage]), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].image_url.as_deref(), Some("https://example.com/archer.jpg"));
    }

    #[test]
    fn test_collect_products_dedupes_and_sorts() {
        let mut by_company = BTreeMap::new();
        by_company.insert(
            "Acme".to_string(),
            vec![
                patent("EP1", Some("Zephyr")),
                patent("EP2", Some("Archer")),
                patent("EP3", Some("Archer")),
                patent("EP4", None),
            ],
        );
        by_company.insert("NoProducts".to_string(), vec![patent("EP5", None)]);

        let products = collect_products(&by_company);
        assert_eq!(products["Acme"], vec!["Archer".to_string(), "Zephyr".to_string()]);
        assert!(!products.contains_key("NoProducts"));
    }

    #[test]
    fn test_load_patents_file_missing_is_fatal() {
        let err = load_patents_file("/nonexistent/patents.json").unwrap_err();
        assert!(matches!(err, AnalysisError::Input(_)));
    }
}
