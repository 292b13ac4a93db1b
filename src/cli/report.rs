//! Monitoring commands: `failures`, `health`, `phases`, `agents`, `trend`

use circulate_core::{error::Result, MonitoringApi};

use super::helpers::{preview, print_json, OutputFormat, Runtime};

/// Handle `failures`
pub async fn handle_failures(runtime: &Runtime, days: i64, format: OutputFormat) -> Result<()> {
    let report = MonitoringApi::new(runtime.store.clone())
        .failure_report(days)
        .await?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("Failures in the last {} days: {}", days, report.total_failures);
            for reason in &report.top_reasons {
                println!(
                    "  {:<18} {:>4}  ({:.1}%)",
                    reason.reason, reason.count, reason.percentage
                );
            }
            if !report.recent_failures.is_empty() {
                println!("Recent:");
                for failure in &report.recent_failures {
                    println!(
                        "  {}  {}: {}",
                        failure.timestamp.format("%Y-%m-%d %H:%M"),
                        preview(&failure.task_description, 60),
                        preview(&failure.error_message, 80)
                    );
                }
            }
            Ok(())
        }
    }
}

/// Handle `health`
pub async fn handle_health(runtime: &Runtime, format: OutputFormat) -> Result<()> {
    let health = MonitoringApi::new(runtime.store.clone())
        .knowledge_health()
        .await?;

    match format {
        OutputFormat::Json => print_json(&health),
        OutputFormat::Text => {
            if health.is_empty() {
                println!("No active knowledge");
            }
            for item in &health {
                println!(
                    "{:>4.1}  {}  (rating {:.1}, used {}x, failure rate {:.2})",
                    item.health_score,
                    preview(&item.title, 60),
                    item.avg_rating,
                    item.usage_count,
                    item.failure_rate
                );
            }
            Ok(())
        }
    }
}

/// Handle `phases`
pub async fn handle_phases(runtime: &Runtime, format: OutputFormat) -> Result<()> {
    let phases = MonitoringApi::new(runtime.store.clone())
        .phase_overview()
        .await?;

    match format {
        OutputFormat::Json => print_json(&phases),
        OutputFormat::Text => {
            for phase in &phases {
                println!(
                    "{:<20} {:>4} items  {:>4} learnings  rating {:.1}  {} uses  \
                     {} tasks  quality {:.1}  success {:.0}%",
                    phase.phase,
                    phase.knowledge_count,
                    phase.learning_count,
                    phase.avg_rating,
                    phase.total_usage,
                    phase.task_count,
                    phase.avg_task_quality,
                    phase.success_rate * 100.0
                );
            }
            Ok(())
        }
    }
}

/// Handle `agents`
pub async fn handle_agents(runtime: &Runtime, days: i64, format: OutputFormat) -> Result<()> {
    let stats = MonitoringApi::new(runtime.store.clone())
        .agent_stats(days)
        .await?;

    match format {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Text => {
            if stats.is_empty() {
                println!("No executions in the last {} days", days);
            }
            for agent in &stats {
                println!(
                    "{:<20} {:>4} tasks  success {:.0}%  quality {:.1}  avg {} ms",
                    agent.agent_name,
                    agent.total_tasks,
                    agent.success_rate * 100.0,
                    agent.avg_quality_score,
                    agent.avg_execution_time_ms
                );
            }
            Ok(())
        }
    }
}

/// Handle `trend`
pub async fn handle_trend(runtime: &Runtime, days: i64, format: OutputFormat) -> Result<()> {
    let trend = MonitoringApi::new(runtime.store.clone())
        .quality_trend(days)
        .await?;

    match format {
        OutputFormat::Json => print_json(&trend),
        OutputFormat::Text => {
            for point in &trend {
                println!(
                    "{}  {:>4} tasks  quality {:.1}  success {:.0}%",
                    point.date,
                    point.task_count,
                    point.avg_quality,
                    point.success_rate * 100.0
                );
            }
            Ok(())
        }
    }
}
