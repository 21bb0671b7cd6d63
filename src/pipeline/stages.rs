//! The three reasoning stages
//!
//! Investigator extracts public claims from press material, Forensic reads
//! patent evidence against those claims, Synthesizer compares the two and
//! emits the structured risk payload. Each stage catches its own failures
//! and reports them through the patch; none of them can abort the run.

use serde::Deserialize;
use tracing::{error, warn};

use super::state::{Contradiction, StagePatch, StageStatus};
use super::{AnalysisContext, AnalysisState};
use crate::errors::{AnalysisError, Result};
use crate::generation::strip_code_fences;
use crate::index::{ScoredDocument, SourceType};

/// Sources embedded in a prompt, at most
const MAX_CONTEXT_SOURCES: usize = 8;
/// Content excerpt length per source line
const SOURCE_EXCERPT_CHARS: usize = 600;
/// Candidate source ids passed to the synthesizer, at most
const MAX_SOURCE_IDS: usize = 5;
/// Section marker splitting the forensic response in two
const RISK_SECTION_MARKER: &str = "Dual-Use Risks";

/// Char-safe prefix of a string
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render retrieved documents as numbered prompt context
pub(crate) fn format_context(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .take(MAX_CONTEXT_SOURCES)
        .enumerate()
        .map(|(i, doc)| {
            let title = doc
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            format!(
                "[Source {}] ({}) {} - {}",
                i + 1,
                doc.source_type,
                title,
                truncate_chars(&doc.content, SOURCE_EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Deduplicated candidate source ids (patent ids, falling back to image
/// urls), capped for prompt size
fn collect_source_ids(docs: &[ScoredDocument]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for doc in docs {
        let id = doc
            .metadata
            .get("patent_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| doc.image_url.clone());
        if let Some(id) = id {
            if !id.is_empty() && seen.insert(id.clone()) {
                ids.push(id);
                if ids.len() == MAX_SOURCE_IDS {
                    break;
                }
            }
        }
    }
    ids
}

// ---------------------------------------------------------------------------
// Stage 1 - Investigator
// ---------------------------------------------------------------------------

/// Retrieve press and imagery context and extract the company's public
/// ethical and marketing claims as opaque text.
pub async fn investigator_stage(ctx: &AnalysisContext, state: &AnalysisState) -> StagePatch {
    match run_investigator(ctx, state).await {
        Ok(patch) => patch,
        Err(err) => {
            error!(company = %state.company_name, error = %err, "investigator stage failed");
            StagePatch {
                investigator_status: Some(StageStatus::Error),
                error: Some(err.to_string()),
                ..Default::default()
            }
        }
    }
}

async fn run_investigator(ctx: &AnalysisContext, state: &AnalysisState) -> Result<StagePatch> {
    let news = ctx
        .retrieve(&state.company_name, &state.user_query, &[SourceType::News], ctx.params.news_top_k)
        .await?;
    let images = ctx
        .retrieve(
            &state.company_name,
            &state.user_query,
            &[SourceType::ProductImage],
            ctx.params.image_top_k,
        )
        .await?;

    let mut combined = news.clone();
    combined.extend(images.iter().cloned());
    let context_text = format_context(&combined);

    let prompt = format!(
        "You are an Investigator agent specializing in corporate ethics and defense industry PR.\n\n\
         Company: {company}\n\
         User Query: {query}\n\n\
         == Press Releases & News Context ==\n\
         {context}\n\n\
         Task:\n\
         1. Extract every explicit or implicit ethical, environmental, and humanitarian claim the company makes in these materials.\n\
         2. Identify the marketing language used to describe their defense products (e.g., \"precision\", \"protecting lives\", \"defensive systems\").\n\
         3. List named products and their stated purpose.\n\n\
         Return your findings as plain text with clear bullet points. Be exhaustive.",
        company = state.company_name,
        query = state.user_query,
        context = context_text,
    );

    let public_claims = ctx.generator.generate(&prompt).await?;

    Ok(StagePatch {
        news_context: Some(news),
        product_images: Some(images),
        public_claims: Some(public_claims),
        investigator_status: Some(StageStatus::Done),
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Stage 2 - Forensic
// ---------------------------------------------------------------------------

/// Retrieve patent context, analyze actual capabilities against the public
/// claims, and split the response into capabilities and risk sections.
pub async fn forensic_stage(ctx: &AnalysisContext, state: &AnalysisState) -> StagePatch {
    match run_forensic(ctx, state).await {
        Ok(patch) => patch,
        Err(err) => {
            error!(company = %state.company_name, error = %err, "forensic stage failed");
            StagePatch {
                forensic_status: Some(StageStatus::Error),
                error: Some(err.to_string()),
                ..Default::default()
            }
        }
    }
}

async fn run_forensic(ctx: &AnalysisContext, state: &AnalysisState) -> Result<StagePatch> {
    let patents = ctx
        .retrieve(
            &state.company_name,
            &state.user_query,
            &[SourceType::Patent],
            ctx.params.patent_top_k,
        )
        .await?;
    let context_text = format_context(&patents);

    let prompt = format!(
        "You are a Forensic Analyst specializing in defense technology patents and dual-use risk assessment.\n\n\
         Company: {company}\n\
         Public Claims Summary:\n\
         {claims}\n\n\
         == Patent Context ==\n\
         {context}\n\n\
         Task:\n\
         1. Identify the actual technical capabilities described in these patents (autonomous targeting, AI-guided weapons, surveillance, electronic warfare, etc.).\n\
         2. Classify any dual-use potential: could civilian technology claims mask military kill-chain relevance?\n\
         3. Note specific technical capabilities that contradict or undermine the company's public ethical claims.\n\n\
         Return a structured analysis with:\n\
         - Technical Capabilities (bullet list)\n\
         - Dual-Use Risks (bullet list)\n\
         - Key Patent Evidence (brief quotes or paraphrases from claims)",
        company = state.company_name,
        claims = truncate_chars(&state.public_claims, 1000),
        context = context_text,
    );

    let full_text = ctx.generator.generate(&prompt).await?;

    // Split into capabilities and risks at the section marker; without the
    // marker everything stays in the capabilities field.
    let (capabilities, risks) = match full_text.find(RISK_SECTION_MARKER) {
        Some(pos) => (
            full_text[..pos].to_string(),
            full_text[pos..].to_string(),
        ),
        None => (full_text.clone(), String::new()),
    };

    Ok(StagePatch {
        patent_context: Some(patents),
        technical_capabilities: Some(capabilities),
        dual_use_risks: Some(risks),
        forensic_status: Some(StageStatus::Done),
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Stage 3 - Synthesizer
// ---------------------------------------------------------------------------

/// Fixed schema the synthesizer demands from the generation service
#[derive(Debug, Deserialize)]
pub struct SynthesisPayload {
    #[serde(default = "default_risk_score")]
    pub risk_score: i64,
    #[serde(default)]
    pub score_drivers: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
}

fn default_risk_score() -> i64 {
    50
}

/// Parse a synthesizer response: strip optional code fences, then require a
/// JSON object matching the fixed schema.
pub fn parse_synthesis(raw: &str) -> Result<SynthesisPayload> {
    let cleaned = strip_code_fences(raw);
    let mut payload: SynthesisPayload = serde_json::from_str(cleaned)
        .map_err(|e| AnalysisError::malformed(format!("synthesis JSON parse error: {}", e), raw))?;
    payload.risk_score = payload.risk_score.clamp(0, 100);
    payload.score_drivers.truncate(3);
    Ok(payload)
}

/// Compare the investigator and forensic findings and produce the final
/// structured payload. A malformed response degrades to a safe default
/// instead of failing the run.
pub async fn synthesizer_stage(ctx: &AnalysisContext, state: &AnalysisState) -> StagePatch {
    let product_image_urls: Vec<String> = state
        .product_images
        .iter()
        .filter_map(|doc| doc.image_url.clone())
        .collect();
    let patent_sources = collect_source_ids(&state.patent_context);

    let prompt = format!(
        "You are a Synthesizer agent producing a corporate transparency risk report.\n\n\
         Company: {company}\n\n\
         == Public Claims (from press releases & marketing) ==\n\
         {claims}\n\n\
         == Actual Technical Capabilities (from patent analysis) ==\n\
         {capabilities}\n\n\
         == Dual-Use Risks Identified ==\n\
         {risks}\n\n\
         Task:\n\
         Produce a structured JSON object with EXACTLY this schema:\n\n\
         {{\n\
           \"risk_score\": <integer 0-100>,\n\
           \"score_drivers\": [\"<key reason for score, max 15 words>\", \"...\", \"...\"],\n\
           \"contradictions\": [\n\
             {{\n\
               \"claim\": \"<exact or paraphrased public claim>\",\n\
               \"evidence\": \"<patent or technical evidence that contradicts it>\",\n\
               \"why_it_matters\": \"<humanitarian or ethical significance>\",\n\
               \"sources\": [\"<patent ID or URL>\"]\n\
             }}\n\
           ]\n\
         }}\n\n\
         Rules:\n\
         - risk_score: 0=fully transparent/civilian, 100=severe contradiction/high dual-use risk\n\
         - Include 3-7 contradictions\n\
         - Be specific, cite patent IDs when possible\n\
         - Output ONLY valid JSON, no markdown fences, no preamble\n\n\
         Patent source IDs available: {sources:?}",
        company = state.company_name,
        claims = truncate_chars(&state.public_claims, 2000),
        capabilities = truncate_chars(&state.technical_capabilities, 2000),
        risks = truncate_chars(&state.dual_use_risks, 1000),
        sources = patent_sources,
    );

    let raw = match ctx.generator.generate(&prompt).await {
        Ok(text) => text,
        Err(err) => {
            error!(company = %state.company_name, error = %err, "synthesizer generation failed");
            return StagePatch {
                products: Some(product_image_urls),
                synthesizer_status: Some(StageStatus::Error),
                error: Some(err.to_string()),
                ..Default::default()
            };
        }
    };

    match parse_synthesis(&raw) {
        Ok(payload) => StagePatch {
            risk_score: Some(payload.risk_score),
            score_drivers: Some(payload.score_drivers),
            products: Some(product_image_urls),
            contradictions: Some(payload.contradictions),
            synthesizer_status: Some(StageStatus::Done),
            ..Default::default()
        },
        Err(err) => {
            warn!(company = %state.company_name, error = %err, "synthesizer response unparseable, degrading");
            StagePatch {
                risk_score: Some(50),
                score_drivers: Some(vec!["Analysis completed with parsing errors".to_string()]),
                products: Some(product_image_urls),
                contradictions: Some(Vec::new()),
                synthesizer_status: Some(StageStatus::Error),
                error: Some(err.to_string()),
                ..Default::default()
            }
        }
    }
}
