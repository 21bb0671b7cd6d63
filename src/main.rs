//! dualwatch - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use dualwatch::aggregate::{self, EntityRanking};
use dualwatch::chunker::PressRelease;
use dualwatch::config::{Config, IndexBackend};
use dualwatch::embedding::OllamaEmbedder;
use dualwatch::generation::OllamaGenerator;
use dualwatch::index::{LocalIndex, QdrantIndex, SourceType, VectorIndex};
use dualwatch::ingest::{self, ProductImageRecord};
use dualwatch::pipeline::{analyze_products, RetrievalParams};
use dualwatch::{run_pipeline, AnalysisContext};

#[derive(Parser)]
#[command(name = "dualwatch", version, about = "Corporate transparency analysis for defense technology")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed, and index source documents
    Ingest {
        /// Patents file: JSON map of company name to patent records
        #[arg(long)]
        patents: Option<PathBuf>,
        /// Press feed: JSON list of articles, routed by keyword
        #[arg(long)]
        press: Option<PathBuf>,
        /// Keyword routing table: JSON map of company name to keywords
        #[arg(long)]
        keywords: Option<PathBuf>,
        /// Product images: JSON map of company name to image records
        #[arg(long)]
        images: Option<PathBuf>,
    },
    /// Run the three-stage analysis pipeline for one company
    Analyze {
        /// Company name to analyze
        company: String,
        /// Optional focusing query
        #[arg(long)]
        query: Option<String>,
        /// Where to write the resulting state as JSON
        #[arg(long, default_value = "analysis_state.json")]
        output: PathBuf,
    },
    /// Analyze every product of every company in a patents file
    Products {
        /// Patents file used to derive the product list
        #[arg(long)]
        patents: PathBuf,
        /// Where to write per-product results
        #[arg(long, default_value = "analysis_results.json")]
        output: PathBuf,
    },
    /// Aggregate per-product results into graded entity rankings
    Rank {
        /// Per-product analysis artifact
        #[arg(long, default_value = "analysis_results.json")]
        input: PathBuf,
        /// Where to write the ranking artifact
        #[arg(long, default_value = "ranked_results.json")]
        output: PathBuf,
    },
    /// Show stored document counts for one company
    Stats {
        company: String,
    },
}

async fn build_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.index.backend {
        IndexBackend::Local => {
            let index = LocalIndex::open(&config.index.local_path)
                .context("Failed to open local index")?;
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => {
            let index = QdrantIndex::connect(
                &config.index.qdrant_url,
                &config.index.collection,
                config.embedding.dimension as u64,
            )
            .await
            .context("Failed to connect to Qdrant")?;
            Ok(Arc::new(index))
        }
    }
}

fn build_context(config: &Config, index: Arc<dyn VectorIndex>) -> AnalysisContext {
    let embedder = Arc::new(OllamaEmbedder::new(
        &config.embedding.base_url,
        &config.embedding.model,
        config.embedding.dimension,
        config.embedding.timeout_secs,
    ));
    let generator = Arc::new(OllamaGenerator::new(
        &config.generation.base_url,
        &config.generation.model,
        config.generation.timeout_secs,
    ));
    let mut ctx = AnalysisContext::new(index, embedder, generator);
    ctx.params = RetrievalParams {
        news_top_k: config.retrieval.news_top_k,
        image_top_k: config.retrieval.image_top_k,
        patent_top_k: config.retrieval.patent_top_k,
    };
    ctx
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn company_progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb
}

async fn cmd_ingest(
    config: &Config,
    patents: Option<PathBuf>,
    press: Option<PathBuf>,
    keywords: Option<PathBuf>,
    images: Option<PathBuf>,
) -> Result<()> {
    let index = build_index(config).await?;
    let embedder = OllamaEmbedder::new(
        &config.embedding.base_url,
        &config.embedding.model,
        config.embedding.dimension,
        config.embedding.timeout_secs,
    );

    if let Some(path) = patents {
        let by_company = ingest::load_patents_file(&path)?;
        let pb = company_progress(by_company.len() as u64);
        let mut total = 0usize;
        for (company, records) in &by_company {
            pb.set_message(company.clone());
            total += ingest::ingest_patents(index.as_ref(), &embedder, company, records).await?;
            pb.inc(1);
        }
        pb.finish_and_clear();
        println!("{} {} patent chunks indexed", "✓".green(), total);
    }

    if let Some(path) = press {
        let keywords_path = keywords
            .context("--press requires --keywords for company routing")?;
        let releases: Vec<PressRelease> = read_json(&path)?;
        let routing: BTreeMap<String, Vec<String>> = read_json(&keywords_path)?;
        let counts =
            ingest::ingest_press_releases(index.as_ref(), &embedder, &releases, &routing).await?;
        let total: usize = counts.values().sum();
        println!("{} {} press chunks indexed across {} companies", "✓".green(), total, counts.len());
    }

    if let Some(path) = images {
        let by_company: BTreeMap<String, Vec<ProductImageRecord>> = read_json(&path)?;
        let mut total = 0usize;
        for (company, records) in &by_company {
            total += ingest::ingest_product_images(index.as_ref(), &embedder, company, records).await?;
        }
        println!("{} {} product image records indexed", "✓".green(), total);
    }

    Ok(())
}

async fn cmd_analyze(
    config: &Config,
    company: String,
    query: Option<String>,
    output: PathBuf,
) -> Result<()> {
    let index = build_index(config).await?;
    let ctx = build_context(config, index);

    let state = run_pipeline(&ctx, &company, query.as_deref().unwrap_or("")).await;

    std::fs::write(&output, serde_json::to_string_pretty(&state)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n{} {}", "Company:".bold(), state.company_name);
    println!("{} {}", "Risk score:".bold(), state.risk_score);
    if !state.score_drivers.is_empty() {
        println!("{}", "Score drivers:".bold());
        for driver in &state.score_drivers {
            println!("  - {}", driver);
        }
    }
    println!("{} {}", "Contradictions:".bold(), state.contradictions.len());
    for c in &state.contradictions {
        println!("  {} {}", "claim:".yellow(), c.claim);
        println!("  {} {}", "evidence:".yellow(), c.evidence);
    }
    if let Some(err) = &state.error {
        println!("{} {}", "Warning:".red(), err);
    }
    println!("\nFull state written to {}", output.display());
    Ok(())
}

async fn cmd_products(config: &Config, patents: PathBuf, output: PathBuf) -> Result<()> {
    let index = build_index(config).await?;
    let ctx = build_context(config, index);

    let by_company = ingest::load_patents_file(&patents)?;
    let products = ingest::collect_products(&by_company);
    if products.is_empty() {
        println!("{}", "No patent-matched products found, nothing to analyze".yellow());
        return Ok(());
    }

    let total: usize = products.values().map(|p| p.len()).sum();
    println!(
        "Analyzing {} products across {} companies (delay {}ms between calls)",
        total,
        products.len(),
        config.generation.call_delay_ms
    );

    let delay = Duration::from_millis(config.generation.call_delay_ms);
    let results = analyze_products(&ctx, &products, delay).await;

    std::fs::write(&output, serde_json::to_string_pretty(&results)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{} results written to {}", "✓".green(), output.display());
    Ok(())
}

fn grade_colored(grade: &str) -> String {
    match grade {
        "A" | "B" => grade.green().to_string(),
        "C" | "D" => grade.yellow().to_string(),
        "E" | "F" => grade.red().to_string(),
        _ => grade.dimmed().to_string(),
    }
}

fn print_ranking_table(rankings: &[EntityRanking]) {
    println!(
        "\n{:<4} {:<24} {:>7} {:>7} {:>7} {:>7} {:>9} {:>8} {:>9}",
        "#".bold(),
        "Company".bold(),
        "Contr".bold(),
        "Mitig".bold(),
        "Safety".bold(),
        "Cost".bold(),
        "Overall".bold(),
        "Score".bold(),
        "Products".bold(),
    );
    for (i, r) in rankings.iter().enumerate() {
        println!(
            "{:<4} {:<24} {:>7} {:>7} {:>7} {:>7} {:>9} {:>8.1} {:>9}",
            i + 1,
            r.company,
            grade_colored(&r.grades["contradiction"]),
            grade_colored(&r.grades["risk_mitigation"]),
            grade_colored(&r.grades["safety"]),
            grade_colored(&r.grades["cost"]),
            grade_colored(&r.overall),
            r.overall_score,
            r.product_count,
        );
    }
    println!();
}

fn cmd_rank(input: PathBuf, output: PathBuf) -> Result<()> {
    let analysis = aggregate::load_analysis_results(&input)?;
    let report = aggregate::build_report(aggregate::aggregate(&analysis));
    aggregate::write_report(&report, &output)?;

    print_ranking_table(&report.rankings);
    println!("{} ranking written to {}", "✓".green(), output.display());
    Ok(())
}

async fn cmd_stats(config: &Config, company: String) -> Result<()> {
    let index = build_index(config).await?;
    let stats = index.stats(&company).await?;
    println!("{} {}", "Company:".bold(), company);
    for source_type in SourceType::ALL {
        println!("  {:<14} {}", source_type.to_string(), stats.get(&source_type).copied().unwrap_or(0));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    match args.command {
        Commands::Ingest { patents, press, keywords, images } => {
            cmd_ingest(&config, patents, press, keywords, images).await
        }
        Commands::Analyze { company, query, output } => {
            cmd_analyze(&config, company, query, output).await
        }
        Commands::Products { patents, output } => cmd_products(&config, patents, output).await,
        Commands::Rank { input, output } => cmd_rank(input, output),
        Commands::Stats { company } => cmd_stats(&config, company).await,
    }
}
