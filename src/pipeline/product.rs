//! Per-product analysis
//!
//! When analysis runs per (company, product) pair the three-stage reasoning
//! collapses into one generation call whose prompt carries both press and
//! patent context for that product. The response schema extends the entity
//! schema with contradiction percentage, cost figures, and two bounded
//! oversight percentages summed into a single risk-mitigation composite.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use super::stages::{format_context, truncate_chars};
use super::state::Contradiction;
use super::AnalysisContext;
use crate::errors::AnalysisError;
use crate::generation::strip_code_fences;
use crate::index::SourceType;

/// Unit and programme cost figures as reported by the generation service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostAnalysis {
    #[serde(default = "not_disclosed")]
    pub unit_cost: String,
    #[serde(default = "not_disclosed")]
    pub programme_cost: String,
    #[serde(default)]
    pub source: String,
}

fn not_disclosed() -> String {
    "not disclosed".to_string()
}

impl Default for CostAnalysis {
    fn default() -> Self {
        Self {
            unit_cost: not_disclosed(),
            programme_cost: not_disclosed(),
            source: String::new(),
        }
    }
}

/// Final analysis record for one (company, product) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAnalysis {
    #[serde(default)]
    pub contradiction_pct: f64,
    #[serde(default)]
    pub risk_score: i64,
    #[serde(default)]
    pub score_drivers: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub cost_analysis: CostAnalysis,
    /// Composite oversight score in [0, 100], higher is safer
    #[serde(default)]
    pub risk_mitigation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tagged outcome of parsing a per-product response: either the model's
/// payload or a safe default carrying the failure reason.
#[derive(Debug)]
pub enum ProductOutcome {
    Parsed(ProductAnalysis),
    Degraded { analysis: ProductAnalysis, reason: String },
}

impl ProductOutcome {
    pub fn into_analysis(self) -> ProductAnalysis {
        match self {
            ProductOutcome::Parsed(analysis) => analysis,
            ProductOutcome::Degraded { analysis, .. } => analysis,
        }
    }
}

/// Raw response schema demanded from the generation service
#[derive(Debug, Deserialize)]
struct RawProductPayload {
    #[serde(default)]
    contradiction_pct: f64,
    #[serde(default = "default_risk_score")]
    risk_score: i64,
    #[serde(default)]
    score_drivers: Vec<String>,
    #[serde(default)]
    contradictions: Vec<Contradiction>,
    #[serde(default)]
    cost_analysis: CostAnalysis,
    #[serde(default)]
    human_in_loop_pct: f64,
    #[serde(default)]
    risk_mitigation_pct: f64,
}

fn default_risk_score() -> i64 {
    50
}

fn degraded_analysis(reason: String) -> ProductAnalysis {
    ProductAnalysis {
        contradiction_pct: 0.0,
        risk_score: 50,
        score_drivers: vec!["Analysis completed with parsing errors".to_string()],
        contradictions: Vec::new(),
        cost_analysis: CostAnalysis::default(),
        risk_mitigation: 50.0,
        error: Some(reason),
    }
}

/// Total parse of a per-product response. Never panics, never propagates a
/// parse failure: malformed input becomes a `Degraded` outcome.
pub fn parse_product_response(raw: &str) -> ProductOutcome {
    let cleaned = strip_code_fences(raw);
    let payload: RawProductPayload = match serde_json::from_str(cleaned) {
        Ok(payload) => payload,
        Err(e) => {
            let err = AnalysisError::malformed(format!("product JSON parse error: {}", e), raw);
            return ProductOutcome::Degraded {
                analysis: degraded_analysis(err.to_string()),
                reason: err.to_string(),
            };
        }
    };

    let mut score_drivers = payload.score_drivers;
    score_drivers.truncate(3);

    // Two sub-metrics bounded to [0, 50] each, summed into one [0, 100]
    // composite. Higher composite means better oversight.
    let human_in_loop = payload.human_in_loop_pct.clamp(0.0, 50.0);
    let mitigation = payload.risk_mitigation_pct.clamp(0.0, 50.0);
    let risk_mitigation = (human_in_loop + mitigation).clamp(0.0, 100.0);

    ProductOutcome::Parsed(ProductAnalysis {
        contradiction_pct: payload.contradiction_pct.clamp(0.0, 100.0),
        risk_score: payload.risk_score.clamp(0, 100),
        score_drivers,
        contradictions: payload.contradictions,
        cost_analysis: payload.cost_analysis,
        risk_mitigation,
        error: None,
    })
}

/// Analyze one (company, product) pair with a single generation call.
pub async fn analyze_product(ctx: &AnalysisContext, company: &str, product: &str) -> ProductAnalysis {
    let query = format!("{} {}", company, product);

    let news = match ctx
        .retrieve(company, &query, &[SourceType::News], ctx.params.news_top_k)
        .await
    {
        Ok(docs) => docs,
        Err(err) => return degraded_analysis(err.to_string()),
    };
    let patents = match ctx
        .retrieve(company, &query, &[SourceType::Patent], ctx.params.patent_top_k)
        .await
    {
        Ok(docs) => docs,
        Err(err) => return degraded_analysis(err.to_string()),
    };

    let prompt = format!(
        "You are an analyst producing a transparency risk report for one defense product.\n\n\
         Company: {company}\n\
         Product: {product}\n\n\
         == Press & Marketing Context ==\n\
         {press}\n\n\
         == Patent Context ==\n\
         {patents}\n\n\
         Task:\n\
         Compare the product's public positioning against the patent evidence and produce a\n\
         structured JSON object with EXACTLY this schema:\n\n\
         {{\n\
           \"contradiction_pct\": <number 0-100: % of public claims contradicted by patents>,\n\
           \"risk_score\": <integer 0-100>,\n\
           \"score_drivers\": [\"<key reason, max 15 words>\", \"...\", \"...\"],\n\
           \"contradictions\": [\n\
             {{\"claim\": \"...\", \"evidence\": \"...\", \"why_it_matters\": \"...\", \"sources\": [\"...\"]}}\n\
           ],\n\
           \"cost_analysis\": {{\n\
             \"unit_cost\": \"<e.g. $82.5M per unit, or 'not disclosed'>\",\n\
             \"programme_cost\": \"<e.g. $1.7B total, or 'not disclosed'>\",\n\
             \"source\": \"<where the figure comes from>\"\n\
           }},\n\
           \"human_in_loop_pct\": <number 0-50: estimated human oversight share>,\n\
           \"risk_mitigation_pct\": <number 0-50: stated safeguards share>\n\
         }}\n\n\
         Rules:\n\
         - Output ONLY valid JSON, no markdown fences, no preamble\n\
         - Cite patent IDs in contradiction sources when possible",
        company = company,
        product = truncate_chars(product, 200),
        press = format_context(&news),
        patents = format_context(&patents),
    );

    let raw = match ctx.generator.generate(&prompt).await {
        Ok(text) => text,
        Err(err) => {
            warn!(company, product, error = %err, "product generation failed, degrading");
            return degraded_analysis(err.to_string());
        }
    };

    match parse_product_response(&raw) {
        ProductOutcome::Parsed(analysis) => analysis,
        ProductOutcome::Degraded { analysis, reason } => {
            warn!(company, product, reason = %reason, "product response unparseable, degrading");
            analysis
        }
    }
}

/// Analyze every product of every company, rate-limiting between generation
/// calls to respect the external service's request ceiling.
pub async fn analyze_products(
    ctx: &AnalysisContext,
    products_by_company: &BTreeMap<String, Vec<String>>,
    call_delay: Duration,
) -> BTreeMap<String, BTreeMap<String, ProductAnalysis>> {
    let total: usize = products_by_company.values().map(|p| p.len()).sum();
    let mut results: BTreeMap<String, BTreeMap<String, ProductAnalysis>> = BTreeMap::new();
    let mut done = 0usize;

    for (company, products) in products_by_company {
        let entry = results.entry(company.clone()).or_default();
        for product in products {
            done += 1;
            info!(company, product, done, total, "analyzing product");
            let analysis = analyze_product(ctx, company, product).await;
            if let Some(err) = &analysis.error {
                warn!(company, product, error = %err, "product analysis degraded");
            }
            entry.insert(product.clone(), analysis);

            if done < total {
                tokio::time::sleep(call_delay).await;
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_product_payload() {
        let raw = r#"{
            "contradiction_pct": 62.5,
            "risk_score": 80,
            "score_drivers": ["a", "b", "c", "d"],
            "contradictions": [],
            "cost_analysis": {"unit_cost": "$82.5M per unit", "programme_cost": "$1.7B", "source": "press"},
            "human_in_loop_pct": 30,
            "risk_mitigation_pct": 15
        }"#;
        let analysis = parse_product_response(raw).into_analysis();
        assert_eq!(analysis.contradiction_pct, 62.5);
        assert_eq!(analysis.risk_score, 80);
        assert_eq!(analysis.score_drivers.len(), 3);
        assert_eq!(analysis.cost_analysis.unit_cost, "$82.5M per unit");
        assert_eq!(analysis.risk_mitigation, 45.0);
        assert!(analysis.error.is_none());
    }

    #[test]
    fn test_sub_metrics_clamped_before_summing() {
        let raw = r#"{"human_in_loop_pct": 90, "risk_mitigation_pct": -10}"#;
        let analysis = parse_product_response(raw).into_analysis();
        // 90 clamps to 50, -10 clamps to 0
        assert_eq!(analysis.risk_mitigation, 50.0);
    }

    #[test]
    fn test_degraded_on_non_json() {
        let outcome = parse_product_response("no JSON here");
        match outcome {
            ProductOutcome::Degraded { analysis, reason } => {
                assert_eq!(analysis.risk_score, 50);
                assert!(analysis.contradictions.is_empty());
                assert!(analysis.error.is_some());
                assert!(reason.contains("parse error"));
            }
            ProductOutcome::Parsed(_) => panic!("expected degraded outcome"),
        }
    }

    #[test]
    fn test_missing_cost_defaults_to_not_disclosed() {
        let analysis = parse_product_response(r#"{"risk_score": 10}"#).into_analysis();
        assert_eq!(analysis.cost_analysis.unit_cost, "not disclosed");
    }

    #[test]
    fn test_fenced_product_payload() {
        let raw = "```json\n{\"risk_score\": 70, \"contradiction_pct\": 10}\n```";
        let analysis = parse_product_response(raw).into_analysis();
        assert_eq!(analysis.risk_score, 70);
        assert_eq!(analysis.contradiction_pct, 10.0);
    }
}
