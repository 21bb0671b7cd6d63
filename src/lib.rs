//! dualwatch - corporate transparency analysis for defense technology
//!
//! Cross-references what defense companies say in public (press releases,
//! product marketing) against what they build in private (patent filings),
//! using retrieval-augmented generation over a vector index of both corpora.
//!
//! # Architecture
//!
//! - **Ingestion**: chunk patents and press feeds, embed, upsert into a
//!   vector index (local disk-backed or Qdrant)
//! - **Pipeline**: three sequential reasoning stages per company
//!   (Investigator → Forensic → Synthesizer) over one shared state
//! - **Products**: single-call per-product analysis with cost extraction
//! - **Aggregation**: cross-entity grading and ranking of the results

pub mod aggregate;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod pipeline;

// Re-export commonly used types
pub use errors::{AnalysisError, Result};
pub use pipeline::{run_pipeline, AnalysisContext, AnalysisState};
