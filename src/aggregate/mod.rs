//! Cross-entity aggregation, grading, and ranking
//!
//! Reads the per-company, per-product analysis artifact and produces the
//! ranked report. Grading is score-based with absolute thresholds, not
//! percentile-relative. Four metrics share one 0-100 scale where higher
//! always means worse:
//!
//!   contradiction    contradiction_pct, as-is
//!   risk_mitigation  composite inverted (source metric is higher-is-safer)
//!   safety           risk_score, as-is
//!   cost             mean unit cost, log-normalized, $1M caps the scale
//!
//! Undisclosed costs are imputed with the 75th percentile of every known
//! cost: penalized, but not assigned the worst possible score.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AnalysisError, Result};
use crate::pipeline::ProductAnalysis;

/// $1M maps to 100 on the normalized cost scale
const COST_MAX_USD: f64 = 1_000_000.0;

/// Metric keys, in display order
pub const METRICS: [&str; 4] = ["contradiction", "risk_mitigation", "safety", "cost"];

fn cost_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$?([\d,]+\.?\d*)\s*([bmk])?").unwrap())
}

/// Parse a unit cost string like `$82.5M per unit` or `$2.1B` into USD.
/// Returns `None` for empty, "not disclosed", "unknown", or unparseable
/// strings.
pub fn parse_unit_cost(unit_cost: &str) -> Option<f64> {
    let s = unit_cost.trim().to_lowercase();
    if s.is_empty() || s.contains("not disclosed") || s == "unknown" {
        return None;
    }
    let caps = cost_re().captures(&s)?;
    let number: f64 = caps[1].replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("b") => 1e9,
        Some("m") => 1e6,
        Some("k") => 1e3,
        _ => 1.0,
    };
    Some(number * multiplier)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Rank-based (non-interpolated) 75th percentile of the known costs
pub fn percentile_75(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64 * 0.75) as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Map a raw USD cost to a 0-100 score (higher = worse) on a log scale.
/// A zero cost means no cost data existed anywhere for the entity: the
/// metric is `None`, never 0.
pub fn normalize_cost(cost_usd: f64) -> Option<f64> {
    if cost_usd <= 0.0 {
        return None;
    }
    let score = cost_usd.log10() / COST_MAX_USD.log10() * 100.0;
    Some(score.min(100.0))
}

/// Convert a 0-100 score (higher = worse) to a letter grade
pub fn grade(score: f64) -> &'static str {
    if score < 40.0 {
        "A"
    } else if score < 60.0 {
        "B"
    } else if score < 70.0 {
        "C"
    } else if score < 80.0 {
        "D"
    } else if score < 90.0 {
        "E"
    } else {
        "F"
    }
}

/// Human-readable aggregate values on their original scales
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedDisplay {
    pub contradiction_pct: f64,
    pub risk_mitigation: f64,
    pub risk_score: f64,
    pub avg_unit_cost_usd: Option<f64>,
}

/// Comparative result for one company, recomputed from scratch on every
/// aggregation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRanking {
    pub company: String,
    pub scores: BTreeMap<String, Option<f64>>,
    pub grades: BTreeMap<String, String>,
    pub overall: String,
    pub overall_score: f64,
    pub aggregated_display: AggregatedDisplay,
    pub product_count: usize,
}

/// Ranking artifact written next to the analysis results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingReport {
    pub rankings: Vec<EntityRanking>,
    pub generated_at: String,
    pub total_companies: usize,
}

/// Per-company, per-product analysis artifact shape
pub type AnalysisResults = BTreeMap<String, BTreeMap<String, ProductAnalysis>>;

/// Aggregate per-product analyses into graded, ranked entities.
pub fn aggregate(analysis: &AnalysisResults) -> Vec<EntityRanking> {
    // Pass 1: every known unit cost, for the non-disclosure sentinel
    let known_costs: Vec<f64> = analysis
        .values()
        .flat_map(|products| products.values())
        .filter_map(|p| parse_unit_cost(&p.cost_analysis.unit_cost))
        .collect();
    let sentinel = percentile_75(&known_costs);

    // Pass 2: per-company means on the higher-is-worse scale
    let mut rankings = Vec::new();
    for (company, products) in analysis {
        if products.is_empty() {
            continue;
        }
        let product_list: Vec<&ProductAnalysis> = products.values().collect();

        let contradiction_vals: Vec<f64> = product_list.iter().map(|p| p.contradiction_pct).collect();
        let risk_mit_raw: Vec<f64> = product_list.iter().map(|p| p.risk_mitigation).collect();
        let risk_mit_inverted: Vec<f64> = risk_mit_raw.iter().map(|v| 100.0 - v).collect();
        let safety_vals: Vec<f64> = product_list.iter().map(|p| p.risk_score as f64).collect();

        let cost_raw: Vec<f64> = product_list
            .iter()
            .map(|p| parse_unit_cost(&p.cost_analysis.unit_cost).unwrap_or(sentinel))
            .collect();
        let avg_cost_usd = if cost_raw.iter().any(|v| *v > 0.0) {
            mean(&cost_raw)
        } else {
            0.0
        };
        let cost_score = normalize_cost(avg_cost_usd);

        let mut scores: BTreeMap<String, Option<f64>> = BTreeMap::new();
        scores.insert("contradiction".to_string(), Some(mean(&contradiction_vals)));
        scores.insert("risk_mitigation".to_string(), Some(mean(&risk_mit_inverted)));
        scores.insert("safety".to_string(), Some(mean(&safety_vals)));
        scores.insert("cost".to_string(), cost_score);

        let mut grades: BTreeMap<String, String> = BTreeMap::new();
        let mut scored_vals = Vec::new();
        for metric in METRICS {
            match scores.get(metric).copied().flatten() {
                Some(value) => {
                    grades.insert(metric.to_string(), grade(value).to_string());
                    scored_vals.push(value);
                }
                None => {
                    grades.insert(metric.to_string(), "N/A".to_string());
                }
            }
        }

        let overall_score = if scored_vals.is_empty() {
            0.0
        } else {
            (mean(&scored_vals) * 10.0).round() / 10.0
        };
        let overall = if scored_vals.is_empty() {
            "N/A".to_string()
        } else {
            grade(overall_score).to_string()
        };

        rankings.push(EntityRanking {
            company: company.clone(),
            scores,
            grades,
            overall,
            overall_score,
            aggregated_display: AggregatedDisplay {
                contradiction_pct: mean(&contradiction_vals),
                risk_mitigation: mean(&risk_mit_raw),
                risk_score: mean(&safety_vals),
                avg_unit_cost_usd: (avg_cost_usd > 0.0).then_some(avg_cost_usd),
            },
            product_count: product_list.len(),
        });
    }

    // Worst overall first; ties broken by safety score descending
    rankings.sort_by(|a, b| {
        b.overall_score
            .partial_cmp(&a.overall_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.aggregated_display
                    .risk_score
                    .partial_cmp(&a.aggregated_display.risk_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    rankings
}

/// Wrap rankings in the artifact shape with a generation timestamp.
pub fn build_report(rankings: Vec<EntityRanking>) -> RankingReport {
    RankingReport {
        total_companies: rankings.len(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        rankings,
    }
}

/// Load the analysis artifact. Missing files and malformed JSON roots are
/// fatal to the run, unlike every in-pipeline failure.
pub fn load_analysis_results(path: impl AsRef<Path>) -> Result<AnalysisResults> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::AggregationInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        AnalysisError::AggregationInput(format!("malformed analysis JSON in {}: {}", path.display(), e))
    })
}

/// Write the ranking artifact as pretty-printed JSON.
pub fn write_report(report: &RankingReport, path: impl AsRef<Path>) -> Result<()> {
    let contents = serde_json::to_string_pretty(report)?;
    std::fs::write(path.as_ref(), contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CostAnalysis, ProductAnalysis};

    fn product(contradiction: f64, risk: i64, mitigation: f64, unit_cost: &str) -> ProductAnalysis {
        ProductAnalysis {
            contradiction_pct: contradiction,
            risk_score: risk,
            score_drivers: Vec::new(),
            contradictions: Vec::new(),
            cost_analysis: CostAnalysis {
                unit_cost: unit_cost.to_string(),
                programme_cost: "not disclosed".to_string(),
                source: String::new(),
            },
            risk_mitigation: mitigation,
            error: None,
        }
    }

    fn results(entries: Vec<(&str, Vec<ProductAnalysis>)>) -> AnalysisResults {
        entries
            .into_iter()
            .map(|(company, products)| {
                let by_product: BTreeMap<String, ProductAnalysis> = products
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| (format!("product-{}", i), p))
                    .collect();
                (company.to_string(), by_product)
            })
            .collect()
    }

    #[test]
    fn test_parse_unit_cost_suffixes() {
        assert_eq!(parse_unit_cost("$82.5M per unit"), Some(82_500_000.0));
        assert_eq!(parse_unit_cost("$2.1B"), Some(2_100_000_000.0));
        assert_eq!(parse_unit_cost("150k"), Some(150_000.0));
        assert_eq!(parse_unit_cost("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_unit_cost("42"), Some(42.0));
    }

    #[test]
    fn test_parse_unit_cost_unknown() {
        assert_eq!(parse_unit_cost(""), None);
        assert_eq!(parse_unit_cost("not disclosed"), None);
        assert_eq!(parse_unit_cost("Not Disclosed publicly"), None);
        assert_eq!(parse_unit_cost("unknown"), None);
        assert_eq!(parse_unit_cost("no figure given"), None);
    }

    #[test]
    fn test_percentile_75_by_rank() {
        assert_eq!(percentile_75(&[1.0, 2.0, 3.0, 4.0]), 4.0);
        assert_eq!(percentile_75(&[10.0]), 10.0);
        assert_eq!(percentile_75(&[3.0, 1.0, 2.0]), 3.0);
        assert_eq!(percentile_75(&[]), 0.0);
    }

    #[test]
    fn test_normalize_cost() {
        assert_eq!(normalize_cost(0.0), None);
        assert_eq!(normalize_cost(-5.0), None);
        assert_eq!(normalize_cost(1_000_000.0), Some(100.0));
        assert_eq!(normalize_cost(1e9), Some(100.0));
        let ten = normalize_cost(10.0).unwrap();
        assert!((ten - 100.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(grade(0.0), "A");
        assert_eq!(grade(39.9), "A");
        assert_eq!(grade(40.0), "B");
        assert_eq!(grade(59.9), "B");
        assert_eq!(grade(60.0), "C");
        assert_eq!(grade(70.0), "D");
        assert_eq!(grade(80.0), "E");
        assert_eq!(grade(90.0), "F");
        assert_eq!(grade(100.0), "F");
    }

    #[test]
    fn test_sentinel_imputes_undisclosed_costs() {
        let analysis = results(vec![
            ("Disclosing", vec![
                product(10.0, 20, 80.0, "$100k"),
                product(10.0, 20, 80.0, "$200k"),
                product(10.0, 20, 80.0, "$300k"),
                product(10.0, 20, 80.0, "$400k"),
            ]),
            ("Opaque", vec![product(10.0, 20, 80.0, "not disclosed")]),
        ]);
        let rankings = aggregate(&analysis);
        let opaque = rankings.iter().find(|r| r.company == "Opaque").unwrap();
        // Sentinel is the rank-based p75 of {100k..400k} = 400k
        assert_eq!(opaque.aggregated_display.avg_unit_cost_usd, Some(400_000.0));
        assert!(opaque.scores["cost"].is_some());
    }

    #[test]
    fn test_no_cost_data_is_null_not_zero() {
        let analysis = results(vec![(
            "Opaque",
            vec![product(10.0, 20, 80.0, "not disclosed")],
        )]);
        let rankings = aggregate(&analysis);
        assert_eq!(rankings[0].scores["cost"], None);
        assert_eq!(rankings[0].grades["cost"], "N/A");
        assert_eq!(rankings[0].aggregated_display.avg_unit_cost_usd, None);
        // The null metric is excluded from the overall mean, not counted as 0
        let expected: f64 = (10.0 + 20.0 + 20.0) / 3.0;
        assert!((rankings[0].overall_score - (expected * 10.0).round() / 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_mitigation_is_inverted() {
        let analysis = results(vec![("Safe", vec![product(0.0, 0, 90.0, "")])]);
        let rankings = aggregate(&analysis);
        // Source metric 90 (higher = safer) becomes 10 on the worse scale
        assert_eq!(rankings[0].scores["risk_mitigation"], Some(10.0));
        assert_eq!(rankings[0].aggregated_display.risk_mitigation, 90.0);
    }

    #[test]
    fn test_grading_monotonic_in_safety() {
        let analysis = results(vec![
            ("HighRisk", vec![product(30.0, 95, 50.0, "$1M")]),
            ("LowRisk", vec![product(30.0, 15, 50.0, "$1M")]),
        ]);
        let rankings = aggregate(&analysis);
        let high = rankings.iter().find(|r| r.company == "HighRisk").unwrap();
        let low = rankings.iter().find(|r| r.company == "LowRisk").unwrap();
        assert_eq!(high.grades["safety"], "F");
        assert_eq!(low.grades["safety"], "A");
        assert!(high.overall_score > low.overall_score);
    }

    #[test]
    fn test_ranking_sorted_worst_first() {
        let analysis = results(vec![
            ("Mild", vec![product(10.0, 10, 90.0, "")]),
            ("Severe", vec![product(90.0, 90, 10.0, "")]),
        ]);
        let rankings = aggregate(&analysis);
        assert_eq!(rankings[0].company, "Severe");
        assert_eq!(rankings[1].company, "Mild");
    }

    #[test]
    fn test_tie_broken_by_safety() {
        // Same overall score, different safety split
        let analysis = results(vec![
            ("SaferTie", vec![product(60.0, 40, 50.0, "")]),
            ("RiskierTie", vec![product(40.0, 60, 50.0, "")]),
        ]);
        let rankings = aggregate(&analysis);
        assert_eq!(rankings[0].overall_score, rankings[1].overall_score);
        assert_eq!(rankings[0].company, "RiskierTie");
    }

    #[test]
    fn test_empty_company_skipped() {
        let mut analysis = results(vec![("Present", vec![product(1.0, 1, 99.0, "")])]);
        analysis.insert("Empty".to_string(), BTreeMap::new());
        let rankings = aggregate(&analysis);
        assert_eq!(rankings.len(), 1);
    }

    #[test]
    fn test_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let analysis_path = dir.path().join("analysis_results.json");
        let report_path = dir.path().join("ranked_results.json");

        let analysis = results(vec![("Acme", vec![product(50.0, 70, 30.0, "$2M")])]);
        std::fs::write(&analysis_path, serde_json::to_string(&analysis).unwrap()).unwrap();

        let loaded = load_analysis_results(&analysis_path).unwrap();
        let report = build_report(aggregate(&loaded));
        write_report(&report, &report_path).unwrap();

        let reread: RankingReport =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(reread.total_companies, 1);
        assert_eq!(reread.rankings[0].company, "Acme");
        assert!(!reread.generated_at.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let err = load_analysis_results("/nonexistent/analysis.json").unwrap_err();
        assert!(matches!(err, AnalysisError::AggregationInput(_)));
    }

    #[test]
    fn test_load_malformed_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = load_analysis_results(&path).unwrap_err();
        assert!(matches!(err, AnalysisError::AggregationInput(_)));
    }
}
