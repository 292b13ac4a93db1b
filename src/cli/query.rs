//! Read commands: `recent`, `phase`, `cost`, `search`, `top`, `curve`

use circulate_core::{
    error::Result, training::DEFAULT_RANKING_LIMIT, AgentTrainingSystem, DevJournalLogger,
    KnowledgeItem, RagEngine, RetrievedDocument, SearchOptions, SecurityLevel,
};
use clap::ValueEnum;
use serde_json::json;

use super::helpers::{parse_list, preview, print_json, OutputFormat, Runtime};

/// How `search` queries the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SearchMode {
    #[default]
    Hybrid,
    Text,
    Vector,
}

/// Arguments of the `search` command
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub query: String,
    pub mode: SearchMode,
    pub limit: usize,
    pub min_similarity: f64,
    pub tags: Option<String>,
    pub phase: Option<String>,
    pub security_level: SecurityLevel,
}

fn journal(runtime: &Runtime) -> DevJournalLogger {
    DevJournalLogger::new(
        runtime.store.clone(),
        runtime.reader_provider(),
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    )
}

fn training_system(runtime: &Runtime) -> AgentTrainingSystem {
    AgentTrainingSystem::new(
        runtime.store.clone(),
        runtime.reader_provider(),
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    )
}

fn print_items(items: &[KnowledgeItem], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(items),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No knowledge found");
            }
            for item in items {
                println!(
                    "{}  [{}] {} (phase: {}, used {}x, rating {:.1}{})",
                    item.id,
                    item.knowledge_type,
                    item.title,
                    item.phase.as_deref().unwrap_or("-"),
                    item.usage_count,
                    item.avg_rating,
                    if item.is_archived { ", archived" } else { "" }
                );
            }
            Ok(())
        }
    }
}

pub fn print_documents(docs: &[RetrievedDocument], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(docs),
        OutputFormat::Text => {
            if docs.is_empty() {
                println!("No matching knowledge");
            }
            for (i, doc) in docs.iter().enumerate() {
                println!(
                    "{}. {} ({:.1}%) [{}]",
                    i + 1,
                    doc.title,
                    doc.score * 100.0,
                    doc.knowledge_type
                );
                println!("   id: {}", doc.id);
                let body = doc.summary.as_deref().unwrap_or(&doc.content);
                println!("   {}", preview(body, 120));
            }
            Ok(())
        }
    }
}

/// Handle `recent`
pub async fn handle_recent(runtime: &Runtime, limit: usize, format: OutputFormat) -> Result<()> {
    let items = journal(runtime).query_recent(limit).await?;
    print_items(&items, format)
}

/// Handle `phase`
pub async fn handle_phase(runtime: &Runtime, phase: String, format: OutputFormat) -> Result<()> {
    let items = journal(runtime).query_by_phase(&phase).await?;
    print_items(&items, format)
}

/// Handle `cost`
pub async fn handle_cost(runtime: &Runtime, phase: String, format: OutputFormat) -> Result<()> {
    let cost = journal(runtime).cost_by_phase(&phase).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "phase": phase, "cost_usd": cost })),
        OutputFormat::Text => {
            println!("{}: ~${:.3}", phase, cost);
            Ok(())
        }
    }
}

/// Handle `search`
pub async fn handle_search(
    runtime: &Runtime,
    args: SearchArgs,
    format: OutputFormat,
) -> Result<()> {
    let provider = match args.mode {
        SearchMode::Text => runtime.reader_provider(),
        SearchMode::Hybrid | SearchMode::Vector => runtime.provider()?,
    };
    let rag = RagEngine::new(runtime.store.clone(), provider);

    let docs = match args.mode {
        SearchMode::Hybrid => {
            let options = SearchOptions {
                top_k: args.limit,
                min_similarity: args.min_similarity,
                filter_tags: parse_list(args.tags).unwrap_or_default(),
                filter_phase: args.phase,
                security_level: args.security_level,
            };
            rag.retrieve(&args.query, &options).await
        }
        SearchMode::Text => rag.search_text(&args.query, args.limit).await,
        SearchMode::Vector => {
            rag.search_vector(&args.query, args.min_similarity, args.limit)
                .await
        }
    };

    print_documents(&docs, format)
}

/// Handle `top`
pub async fn handle_top(
    runtime: &Runtime,
    rated: bool,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let training = training_system(runtime);
    let limit = limit.unwrap_or(DEFAULT_RANKING_LIMIT);

    let docs = if rated {
        training.highest_rated_knowledge(limit).await
    } else {
        training.most_used_knowledge(limit).await
    };
    print_documents(&docs, format)
}

/// Handle `curve`
pub async fn handle_curve(runtime: &Runtime, phase: String, format: OutputFormat) -> Result<()> {
    let training = training_system(runtime);
    let curve = training.learning_curve(&phase).await;

    match format {
        OutputFormat::Json => print_json(&curve),
        OutputFormat::Text => {
            println!("Phase: {}", phase);
            println!("  Tasks completed:  {}", curve.tasks_completed);
            println!("  Average quality:  {:.1}", curve.avg_quality);
            println!("  Knowledge growth: {:.1}", curve.knowledge_growth);
            Ok(())
        }
    }
}
