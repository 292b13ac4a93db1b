//! Knowledge capture commands: `log`, `adr`, `solution`

use circulate_core::{
    error::Result, journal::solution_title, AdrDecision, DevJournalLogger, DevLogEntry,
    KnowledgeId, KnowledgeType, SecurityLevel,
};
use serde_json::json;

use super::helpers::{parse_list, print_json, OutputFormat, Runtime};

/// Arguments of the `log` command
#[derive(Debug, Clone)]
pub struct LogArgs {
    pub title: String,
    pub content: String,
    pub knowledge_type: KnowledgeType,
    pub phase: Option<String>,
    pub tags: Option<String>,
    pub complexity: Option<u8>,
    pub security_level: Option<SecurityLevel>,
    pub commits: Option<String>,
}

fn journal(runtime: &Runtime) -> Result<DevJournalLogger> {
    Ok(DevJournalLogger::new(
        runtime.store.clone(),
        runtime.provider()?,
        runtime.config.knowledge_dir.clone(),
        runtime.config.resolved_author(),
    ))
}

fn report(id: KnowledgeId, title: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&json!({ "id": id, "title": title })),
        OutputFormat::Text => {
            println!("Knowledge logged: {} ({})", title, id);
            Ok(())
        }
    }
}

/// Handle `log`
pub async fn handle_log(runtime: &Runtime, args: LogArgs, format: OutputFormat) -> Result<()> {
    let mut entry = DevLogEntry::new(args.title, args.content, args.knowledge_type);
    entry.phase = runtime.phase(args.phase);
    entry.tags = parse_list(args.tags);
    entry.complexity = args.complexity;
    entry.security_level = args.security_level;
    entry.related_commits = parse_list(args.commits);

    let id = journal(runtime)?.log_development(&entry).await?;
    report(id, &entry.title, format)
}

/// Handle `adr`
pub async fn handle_adr(
    runtime: &Runtime,
    decision: AdrDecision,
    format: OutputFormat,
) -> Result<()> {
    let id = journal(runtime)?.log_adr(&decision).await?;
    report(id, &format!("ADR: {}", decision.title), format)
}

/// Handle `solution`
pub async fn handle_solution(
    runtime: &Runtime,
    problem: String,
    solution: String,
    tags: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let id = journal(runtime)?
        .log_solution(&problem, &solution, parse_list(tags))
        .await?;
    report(id, &solution_title(&problem), format)
}
