//! Analysis pipeline: a linear three-stage state machine
//!
//! One shared `AnalysisState` flows through Investigator → Forensic →
//! Synthesizer. Stages run strictly in sequence because each prompt depends
//! on the previous stage's text; failures stay inside the stage that raised
//! them and the run always completes with a structurally valid state.

pub mod product;
pub mod stages;
pub mod state;

pub use product::{analyze_product, analyze_products, CostAnalysis, ProductAnalysis, ProductOutcome};
pub use state::{AnalysisState, Contradiction, StagePatch, StageStatus};

use std::sync::Arc;
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::errors::Result;
use crate::generation::Generator;
use crate::index::{ScoredDocument, SourceType, VectorIndex};

/// Retrieval fan-in per stage
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub news_top_k: usize,
    pub image_top_k: usize,
    pub patent_top_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            news_top_k: 8,
            image_top_k: 5,
            patent_top_k: 10,
        }
    }
}

/// Explicitly constructed context owning every external collaborator the
/// stages reach: the vector index, the embedding function, and the
/// generation function.
pub struct AnalysisContext {
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub params: RetrievalParams,
}

impl AnalysisContext {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            params: RetrievalParams::default(),
        }
    }

    /// Embed the query and search the index. An embedding failure propagates
    /// to the calling stage; a backend query failure degrades to an empty
    /// context instead.
    pub(crate) async fn retrieve(
        &self,
        company: &str,
        query: &str,
        source_types: &[SourceType],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let embedding = self.embedder.embed(query).await?;
        match self
            .index
            .query(&embedding, company, Some(source_types), top_k)
            .await
        {
            Ok(hits) => Ok(hits),
            Err(err) => {
                warn!(company, error = %err, "retrieval failed, continuing with empty context");
                Ok(Vec::new())
            }
        }
    }
}

/// Run the full three-stage pipeline for one company.
///
/// The returned state is always complete: an errored stage leaves its fields
/// at their defaults, marks its status, and records the error.
pub async fn run_pipeline(ctx: &AnalysisContext, company: &str, query: &str) -> AnalysisState {
    let mut state = AnalysisState::new(company, query);
    info!(company, "starting analysis pipeline");

    StagePatch {
        investigator_status: Some(StageStatus::Running),
        ..Default::default()
    }
    .apply(&mut state);
    stages::investigator_stage(ctx, &state).await.apply(&mut state);

    StagePatch {
        forensic_status: Some(StageStatus::Running),
        ..Default::default()
    }
    .apply(&mut state);
    stages::forensic_stage(ctx, &state).await.apply(&mut state);

    StagePatch {
        synthesizer_status: Some(StageStatus::Running),
        ..Default::default()
    }
    .apply(&mut state);
    stages::synthesizer_stage(ctx, &state).await.apply(&mut state);

    info!(
        company,
        risk_score = state.risk_score,
        contradictions = state.contradictions.len(),
        "analysis pipeline finished"
    );
    state
}
