//! Shared analysis state and the stage-patch reducer
//!
//! Every stage reads the full state and returns an immutable patch; the
//! reducer merges patches additively. Stage statuses only move forward
//! (pending → running → done/error), and an errored stage never blocks the
//! stages after it.

use serde::{Deserialize, Serialize};

use crate::index::ScoredDocument;

/// Per-stage lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Running => 1,
            StageStatus::Done => 2,
            StageStatus::Error => 2,
        }
    }

    /// Monotonic advance: a status never moves backwards
    fn advance(self, next: StageStatus) -> StageStatus {
        if next.rank() >= self.rank() {
            next
        } else {
            self
        }
    }
}

/// A public claim contradicted by technical evidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contradiction {
    #[serde(default)]
    pub claim: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub why_it_matters: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Shared state for one analysis run, mutated only through patches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    // Input
    pub company_name: String,
    pub user_query: String,

    // Investigator output
    #[serde(default)]
    pub news_context: Vec<ScoredDocument>,
    #[serde(default)]
    pub product_images: Vec<ScoredDocument>,
    #[serde(default)]
    pub public_claims: String,
    #[serde(default)]
    pub investigator_status: StageStatus,

    // Forensic output
    #[serde(default)]
    pub patent_context: Vec<ScoredDocument>,
    #[serde(default)]
    pub technical_capabilities: String,
    #[serde(default)]
    pub dual_use_risks: String,
    #[serde(default)]
    pub forensic_status: StageStatus,

    // Synthesizer output
    #[serde(default)]
    pub risk_score: i64,
    #[serde(default)]
    pub score_drivers: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub synthesizer_status: StageStatus,

    // Error tracking
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisState {
    pub fn new(company_name: impl Into<String>, user_query: impl Into<String>) -> Self {
        let company_name = company_name.into();
        let user_query = user_query.into();
        let user_query = if user_query.is_empty() {
            format!(
                "Analyze defense ethics and dual-use risks for {}",
                company_name
            )
        } else {
            user_query
        };
        Self {
            company_name,
            user_query,
            news_context: Vec::new(),
            product_images: Vec::new(),
            public_claims: String::new(),
            investigator_status: StageStatus::Pending,
            patent_context: Vec::new(),
            technical_capabilities: String::new(),
            dual_use_risks: String::new(),
            forensic_status: StageStatus::Pending,
            risk_score: 0,
            score_drivers: Vec::new(),
            products: Vec::new(),
            contradictions: Vec::new(),
            synthesizer_status: StageStatus::Pending,
            error: None,
        }
    }
}

/// Partial state produced by one stage. `None` means "leave as is".
#[derive(Debug, Clone, Default)]
pub struct StagePatch {
    pub news_context: Option<Vec<ScoredDocument>>,
    pub product_images: Option<Vec<ScoredDocument>>,
    pub public_claims: Option<String>,
    pub investigator_status: Option<StageStatus>,
    pub patent_context: Option<Vec<ScoredDocument>>,
    pub technical_capabilities: Option<String>,
    pub dual_use_risks: Option<String>,
    pub forensic_status: Option<StageStatus>,
    pub risk_score: Option<i64>,
    pub score_drivers: Option<Vec<String>>,
    pub products: Option<Vec<String>>,
    pub contradictions: Option<Vec<Contradiction>>,
    pub synthesizer_status: Option<StageStatus>,
    pub error: Option<String>,
}

impl StagePatch {
    /// Merge this patch into the state. Fields are only ever set, never
    /// removed; statuses advance monotonically.
    pub fn apply(self, state: &mut AnalysisState) {
        if let Some(v) = self.news_context {
            state.news_context = v;
        }
        if let Some(v) = self.product_images {
            state.product_images = v;
        }
        if let Some(v) = self.public_claims {
            state.public_claims = v;
        }
        if let Some(v) = self.investigator_status {
            state.investigator_status = state.investigator_status.advance(v);
        }
        if let Some(v) = self.patent_context {
            state.patent_context = v;
        }
        if let Some(v) = self.technical_capabilities {
            state.technical_capabilities = v;
        }
        if let Some(v) = self.dual_use_risks {
            state.dual_use_risks = v;
        }
        if let Some(v) = self.forensic_status {
            state.forensic_status = state.forensic_status.advance(v);
        }
        if let Some(v) = self.risk_score {
            state.risk_score = v;
        }
        if let Some(v) = self.score_drivers {
            state.score_drivers = v;
        }
        if let Some(v) = self.products {
            state.products = v;
        }
        if let Some(v) = self.contradictions {
            state.contradictions = v;
        }
        if let Some(v) = self.synthesizer_status {
            state.synthesizer_status = state.synthesizer_status.advance(v);
        }
        if let Some(v) = self.error {
            state.error = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_defaults() {
        let state = AnalysisState::new("Acme Defense", "");
        assert_eq!(state.investigator_status, StageStatus::Pending);
        assert_eq!(state.risk_score, 0);
        assert!(state.user_query.contains("Acme Defense"));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_explicit_query_is_kept() {
        let state = AnalysisState::new("Acme", "What about export controls?");
        assert_eq!(state.user_query, "What about export controls?");
    }

    #[test]
    fn test_patch_sets_only_named_fields() {
        let mut state = AnalysisState::new("Acme", "");
        let patch = StagePatch {
            public_claims: Some("We build only civilian radar".to_string()),
            investigator_status: Some(StageStatus::Done),
            ..Default::default()
        };
        patch.apply(&mut state);
        assert_eq!(state.public_claims, "We build only civilian radar");
        assert_eq!(state.investigator_status, StageStatus::Done);
        // Untouched stage fields keep their defaults
        assert_eq!(state.forensic_status, StageStatus::Pending);
        assert!(state.technical_capabilities.is_empty());
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let mut state = AnalysisState::new("Acme", "");
        StagePatch {
            investigator_status: Some(StageStatus::Done),
            ..Default::default()
        }
        .apply(&mut state);
        StagePatch {
            investigator_status: Some(StageStatus::Running),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.investigator_status, StageStatus::Done);
    }

    #[test]
    fn test_error_patch_records_message() {
        let mut state = AnalysisState::new("Acme", "");
        StagePatch {
            forensic_status: Some(StageStatus::Error),
            error: Some("generation timed out".to_string()),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.forensic_status, StageStatus::Error);
        assert_eq!(state.error.as_deref(), Some("generation timed out"));
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(serde_json::to_string(&StageStatus::Done).unwrap(), "\"done\"");
        assert_eq!(serde_json::to_string(&StageStatus::Error).unwrap(), "\"error\"");
    }
}
