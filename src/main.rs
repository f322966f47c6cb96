//! # hybrid-rag: ask a question against documents, encyclopedia and web
//!
//! Usage:
//!   hybrid-rag ask "What is the capital of France?"
//!   hybrid-rag ask "Latest Mars rover news" --web --docs notes/mission.md
//!   hybrid-rag ask "..." --budget 500 --no-generate
//!   hybrid-rag config                      # print the effective configuration

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use hybrid_rag::config::RagConfig;
use hybrid_rag::pipeline::rag::classify::VocabularyClassifier;
use hybrid_rag::pipeline::rag::ollama::OllamaGenerator;
use hybrid_rag::pipeline::rag::orchestrator::GroundedContext;
use hybrid_rag::pipeline::rag::retrieval::{
    clean_text, DocumentAdapter, EncyclopediaAdapter, HashEmbedder, InMemoryVectorIndex,
    WebAdapter,
};
use hybrid_rag::pipeline::rag::router::QueryRouter;
use hybrid_rag::pipeline::rag::tavily::TavilyClient;
use hybrid_rag::pipeline::rag::tokenizer::CharRatioTokenizer;
use hybrid_rag::pipeline::rag::types::Query;
use hybrid_rag::pipeline::rag::wikipedia::WikipediaClient;
use hybrid_rag::{CancelToken, HybridRagPipeline};

#[derive(Parser)]
#[command(name = "hybrid-rag", version, about = "Hybrid retrieval with cited answers")]
struct Cli {
    /// Config file (defaults to $HYBRID_RAG_CONFIG, then ~/HybridRag/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question with citations
    Ask {
        question: String,

        /// Allow live web search for this question
        #[arg(long)]
        web: bool,

        /// Context token budget (overrides config)
        #[arg(long)]
        budget: Option<usize>,

        /// Text or markdown files to index as the private corpus
        #[arg(long = "docs", num_args = 1..)]
        docs: Vec<PathBuf>,

        /// Stop after context assembly
        #[arg(long)]
        no_generate: bool,

        /// Summarize the first N cited sources
        #[arg(long, default_value_t = 0)]
        summaries: usize,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    hybrid_rag::init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_or_default()?,
    };

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Ask {
            question,
            web,
            budget,
            docs,
            no_generate,
            summaries,
        } => {
            if let Some(budget) = budget {
                config.token_budget = budget;
            }
            config.validate()?;
            let web = web || config.web_search_enabled;
            ask(config, &question, web, &docs, !no_generate, summaries)
        }
    }
}

fn ask(
    config: RagConfig,
    question: &str,
    web: bool,
    docs: &[PathBuf],
    generate: bool,
    summaries: usize,
) -> Result<()> {
    // Blocking HTTP clients are built and dropped outside the async runtime.
    let embedder = Arc::new(HashEmbedder::default());
    let mut index = InMemoryVectorIndex::new();
    for path in docs {
        index_file(&mut index, embedder.as_ref(), path)?;
    }
    let classifier = VocabularyClassifier::from_texts(index.texts());
    tracing::info!(
        passages = index.len(),
        vocabulary = classifier.vocabulary_size(),
        "Document corpus loaded"
    );

    let router = QueryRouter::from_config(&config).with_classifier(Arc::new(classifier));
    let services = config.services.clone();
    let mut pipeline = HybridRagPipeline::new(config, router, Arc::new(CharRatioTokenizer))
        .with_adapter(Arc::new(DocumentAdapter::new(embedder, Arc::new(index))))
        .with_adapter(Arc::new(EncyclopediaAdapter::new(Arc::new(
            WikipediaClient::from_config(&services)?,
        ))));

    match TavilyClient::from_config(&services) {
        Ok(client) => pipeline = pipeline.with_adapter(Arc::new(WebAdapter::new(Arc::new(client)))),
        Err(e) if web => eprintln!("Web search unavailable: {e}"),
        Err(_) => {}
    }

    let generator = if generate {
        let found = OllamaGenerator::with_available_model(&services);
        if found.is_none() {
            eprintln!(
                "Model {} not reachable at {}, showing context only",
                services.ollama_model, services.ollama_url
            );
        }
        found
    } else {
        None
    };
    let has_generator = generator.is_some();
    if let Some(generator) = generator {
        pipeline = pipeline.with_generator(Arc::new(generator));
    }

    let query = Query::new(question, Uuid::new_v4(), web);

    run_detached(async {
        let (handle, cancel) = CancelToken::new();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
                // A second Ctrl-C exits without waiting for the exchange to unwind.
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });

        if has_generator {
            let answer = pipeline.answer(&query, &cancel).await?;
            print_grounded(&answer.grounded);
            println!("\n── Answer ──\n{}", answer.text);
            if !answer.unresolved_markers.is_empty() {
                eprintln!("Answer cites unknown markers: {:?}", answer.unresolved_markers);
            }
            if summaries > 0 {
                let summaries = pipeline
                    .summarize_sources(&answer.grounded.ledger, summaries)
                    .await?;
                println!("\n── Source summaries ──");
                for s in summaries {
                    println!("[{}] {} ({}): {}", s.marker, s.locator, s.source_kind, s.summary);
                }
            }
            print_sources(&answer.grounded);
        } else {
            let grounded = pipeline.run(&query, &cancel).await?;
            print_grounded(&grounded);
            print_sources(&grounded);
        }
        anyhow::Ok(())
    })?
}

/// Drive `future` on a fresh runtime, then shut it down without waiting for
/// blocking collaborator calls that were abandoned on timeout or cancel.
fn run_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Split a text file into blank-line separated passages and index each one.
fn index_file(index: &mut InMemoryVectorIndex, embedder: &HashEmbedder, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    for (i, passage) in raw.split("\n\n").map(clean_text).filter(|p| !p.is_empty()).enumerate() {
        index.add_text(embedder, &format!("{name}#p{}", i + 1), &passage)?;
    }
    Ok(())
}

fn print_grounded(grounded: &GroundedContext) {
    let sources: Vec<String> = grounded
        .decision
        .selected_sources()
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!(
        "Route: {} ({})",
        grounded.decision.mode().label(),
        sources.join(", ")
    );
    for warning in &grounded.warnings {
        eprintln!("Warning: {warning}");
    }

    if grounded.no_evidence() {
        println!("\nNo evidence found.");
        return;
    }
    let truncated = if grounded.context.truncated() { ", truncated" } else { "" };
    println!(
        "\n── Context ({} tokens{truncated}) ──\n{}",
        grounded.context.token_count, grounded.context.text
    );
}

fn print_sources(grounded: &GroundedContext) {
    if grounded.ledger.is_empty() {
        return;
    }
    println!("\n── Sources ──\n{}", grounded.ledger);
}
