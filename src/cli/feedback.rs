//! Feedback loop commands: `fail`, `optimize`, `analyze`

use chrono::Utc;
use circulate_core::{categorize_error, error::Result, FeedbackLoop, TaskFailure};
use serde_json::json;
use uuid::Uuid;

use super::helpers::{parse_ids, print_json, OutputFormat, Runtime};

/// Handle `fail`
pub async fn handle_fail(
    runtime: &Runtime,
    task_id: Option<String>,
    description: String,
    error: String,
    attempted: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let failure = TaskFailure {
        task_id: task_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        description,
        error_message: error,
        attempted_knowledge: parse_ids(&attempted)?,
        timestamp: Utc::now(),
    };

    FeedbackLoop::new(runtime.store.clone())
        .with_agent(runtime.config.resolved_author())
        .record_failure(&failure)
        .await?;

    let category = categorize_error(&failure.error_message);
    match format {
        OutputFormat::Json => print_json(&json!({
            "task_id": failure.task_id,
            "category": category.label(),
        })),
        OutputFormat::Text => {
            println!("Failure recorded: {} ({})", failure.task_id, category);
            Ok(())
        }
    }
}

/// Handle `optimize`
pub async fn handle_optimize(runtime: &Runtime, apply: bool, format: OutputFormat) -> Result<()> {
    let feedback = FeedbackLoop::new(runtime.store.clone());
    let suggestions = feedback.generate_optimization_suggestions().await?;

    let outcome = if apply {
        Some(feedback.apply_optimizations(&suggestions).await?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => print_json(&json!({
            "suggestions": suggestions,
            "applied": outcome,
        })),
        OutputFormat::Text => {
            if suggestions.is_empty() {
                println!("No optimization suggestions");
            }
            for s in &suggestions {
                println!(
                    "{:<8} {}  rating {:.1}, used {}x, failure rate {:.0}%",
                    s.suggestion.to_string(),
                    s.knowledge_id,
                    s.current_rating,
                    s.usage_count,
                    s.failure_rate * 100.0
                );
                println!("         {}", s.reason);
            }
            if let Some(outcome) = outcome {
                println!();
                println!(
                    "Applied: {} archived, {} flagged for improvement",
                    outcome.archived, outcome.improved
                );
            }
            Ok(())
        }
    }
}

/// Handle `analyze`
pub async fn handle_analyze(runtime: &Runtime, days: i64, format: OutputFormat) -> Result<()> {
    let analysis = FeedbackLoop::new(runtime.store.clone())
        .failure_analysis(days)
        .await?;

    match format {
        OutputFormat::Json => print_json(&analysis),
        OutputFormat::Text => {
            println!("Failures in the last {} days: {}", days, analysis.total_failures);
            for reason in &analysis.top_failure_reasons {
                println!("  {:<18} {}", reason.reason, reason.count);
            }
            if !analysis.most_problematic_knowledge.is_empty() {
                println!("Most problematic knowledge:");
                for item in &analysis.most_problematic_knowledge {
                    println!(
                        "  {:.0}%  {} ({})",
                        item.failure_rate * 100.0,
                        item.title,
                        item.id
                    );
                }
            }
            Ok(())
        }
    }
}
