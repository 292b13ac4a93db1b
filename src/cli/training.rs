//! Training loop commands: `prompt`, `learn`, `archive`

use circulate_core::{error::Result, AgentTask, AgentTrainingSystem, TaskExecution};
use serde_json::json;

use super::helpers::{parse_ids, print_json, OutputFormat, Runtime};
use super::query::print_documents;

/// Arguments of the `learn` command
#[derive(Debug, Clone)]
pub struct LearnArgs {
    pub description: String,
    pub solution: String,
    pub quality: f64,
    pub time_spent: f64,
    pub used: Vec<String>,
    pub phase: Option<String>,
}

/// Handle `prompt`
pub async fn handle_prompt(runtime: &Runtime, task: AgentTask, format: OutputFormat) -> Result<()> {
    let training = AgentTrainingSystem::new(
        runtime.store.clone(),
        runtime.provider()?,
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    );
    let enhanced = training.before_task(&task).await;

    match format {
        OutputFormat::Json => print_json(&enhanced),
        OutputFormat::Text => {
            println!("{}", enhanced.prompt);
            if !enhanced.sources.is_empty() {
                println!();
                println!("Sources:");
                print_documents(&enhanced.sources, format)?;
            }
            Ok(())
        }
    }
}

/// Handle `learn`
pub async fn handle_learn(runtime: &Runtime, args: LearnArgs, format: OutputFormat) -> Result<()> {
    let training = AgentTrainingSystem::new(
        runtime.store.clone(),
        runtime.provider()?,
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    );
    let execution = TaskExecution {
        description: args.description,
        solution: args.solution,
        quality: args.quality,
        time_spent: args.time_spent,
        used_knowledge: parse_ids(&args.used)?,
    };
    let phase = runtime.phase(args.phase);

    let id = training.after_task(&execution, phase.as_deref()).await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "id": id,
            "credited": execution.used_knowledge,
        })),
        OutputFormat::Text => {
            println!("Learning logged: {}", id);
            println!("Credited {} knowledge items", execution.used_knowledge.len());
            Ok(())
        }
    }
}

/// Handle `archive`
pub async fn handle_archive(runtime: &Runtime, format: OutputFormat) -> Result<()> {
    let training = AgentTrainingSystem::new(
        runtime.store.clone(),
        runtime.reader_provider(),
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    );
    let counts = training.archive_unused_knowledge().await;

    match format {
        OutputFormat::Json => print_json(&counts),
        OutputFormat::Text => {
            println!(
                "Archived {} items, compressed {} items",
                counts.archived, counts.compressed
            );
            Ok(())
        }
    }
}
