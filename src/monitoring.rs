//! Read-only reports over failures, agent executions and knowledge statistics
//!
//! Knowledge health combines four factors into a 0-10 score:
//! rating 40%, reliability 30%, usage 20%, recency 10%.
//! Usage is log-scaled and saturates at 20 uses; recency decays with a
//! 30-day half-life from the last use (or creation).

use crate::error::Result;
use crate::feedback::{count_categories, DEFAULT_ANALYSIS_DAYS};
use crate::storage::{KnowledgeOrder, KnowledgeQuery, KnowledgeStore};
use crate::types::{AgentExecution, ExecutionStatus, KnowledgeId, KnowledgeItem, KnowledgeType};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const HEALTH_SAMPLE: usize = 50;
const RECENT_FAILURES: usize = 10;
const TOP_REASONS: usize = 5;
const DESCRIPTION_CHARS: usize = 100;
const ERROR_CHARS: usize = 200;

/// Uses at which the usage factor reaches 1.0
const FULL_USAGE: f64 = 20.0;
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

pub const DEFAULT_REPORT_DAYS: i64 = DEFAULT_ANALYSIS_DAYS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonShare {
    pub reason: String,
    pub count: usize,
    /// Share of all windowed failures, one decimal
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentFailure {
    pub id: i64,
    pub task_description: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailureReport {
    pub total_failures: usize,
    pub top_reasons: Vec<ReasonShare>,
    pub recent_failures: Vec<RecentFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHealth {
    pub id: KnowledgeId,
    pub title: String,
    pub health_score: f64,
    pub avg_rating: f64,
    pub usage_count: u32,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub knowledge_count: usize,
    pub learning_count: usize,
    pub avg_rating: f64,
    pub total_usage: u64,
    pub task_count: usize,
    pub avg_task_quality: f64,
    pub success_rate: f64,
}

/// Execution figures of one agent over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_name: String,
    pub total_tasks: usize,
    /// Two decimals
    pub success_rate: f64,
    /// One decimal; failures count as 0
    pub avg_quality_score: f64,
    pub avg_execution_time_ms: u64,
    pub period_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTrendPoint {
    pub date: NaiveDate,
    pub avg_quality: f64,
    pub task_count: usize,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct ExecutionTotals {
    count: usize,
    successes: usize,
    quality_sum: f64,
    time_sum_ms: u128,
}

impl ExecutionTotals {
    fn add(&mut self, execution: &AgentExecution) {
        self.count += 1;
        if execution.status == ExecutionStatus::Success {
            self.successes += 1;
        }
        self.quality_sum += execution.quality_score;
        self.time_sum_ms += u128::from(execution.execution_time_ms);
    }

    fn success_rate(&self) -> f64 {
        self.ratio(self.successes as f64)
    }

    fn avg_quality(&self) -> f64 {
        self.ratio(self.quality_sum)
    }

    fn avg_time_ms(&self) -> u64 {
        self.ratio(self.time_sum_ms as f64).round() as u64
    }

    fn ratio(&self, sum: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            sum / self.count as f64
        }
    }
}

/// Reporting over the knowledge store
pub struct MonitoringApi {
    store: Arc<dyn KnowledgeStore>,
}

impl MonitoringApi {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Failures of the last `days`, categorized, with the latest few listed
    pub async fn failure_report(&self, days: i64) -> Result<FailureReport> {
        let since = Utc::now() - Duration::days(days);
        let failures = self.store.select_failures(since).await?;
        debug!("{} failures in the last {} days", failures.len(), days);

        if failures.is_empty() {
            return Ok(FailureReport::default());
        }

        let total = failures.len();
        let top_reasons = count_categories(failures.iter().map(|f| f.error_message.as_str()))
            .into_iter()
            .take(TOP_REASONS)
            .map(|c| ReasonShare {
                percentage: round_to(c.count as f64 / total as f64 * 100.0, 1),
                reason: c.reason,
                count: c.count,
            })
            .collect();

        let recent_failures = failures
            .iter()
            .take(RECENT_FAILURES)
            .map(|f| RecentFailure {
                id: f.id,
                task_description: f.description.chars().take(DESCRIPTION_CHARS).collect(),
                error_message: f.error_message.chars().take(ERROR_CHARS).collect(),
                timestamp: f.timestamp,
            })
            .collect();

        Ok(FailureReport {
            total_failures: total,
            top_reasons,
            recent_failures,
        })
    }

    /// Health of the best-rated active items, healthiest first
    pub async fn knowledge_health(&self) -> Result<Vec<KnowledgeHealth>> {
        let query = KnowledgeQuery::new()
            .active()
            .order(KnowledgeOrder::HighestRated)
            .limit(HEALTH_SAMPLE);
        let items = self.store.select_knowledge(&query).await?;

        let now = Utc::now();
        let mut report: Vec<KnowledgeHealth> = items
            .into_iter()
            .map(|item| KnowledgeHealth {
                health_score: round_to(health_score(&item, now), 1),
                avg_rating: round_to(item.avg_rating, 1),
                failure_rate: round_to(item.failure_rate, 2),
                usage_count: item.usage_count,
                id: item.id,
                title: item.title,
            })
            .collect();

        report.sort_by(|a, b| b.health_score.total_cmp(&a.health_score));
        Ok(report)
    }

    /// Per-agent execution figures of the last `days`, agents in name order
    pub async fn agent_stats(&self, days: i64) -> Result<Vec<AgentStats>> {
        let since = Utc::now() - Duration::days(days);
        let executions = self.store.select_executions(since).await?;
        debug!("{} executions in the last {} days", executions.len(), days);

        let mut agents: BTreeMap<String, ExecutionTotals> = BTreeMap::new();
        for execution in &executions {
            agents
                .entry(execution.agent_name.clone())
                .or_default()
                .add(execution);
        }

        Ok(agents
            .into_iter()
            .map(|(agent_name, totals)| AgentStats {
                agent_name,
                total_tasks: totals.count,
                success_rate: round_to(totals.success_rate(), 2),
                avg_quality_score: round_to(totals.avg_quality(), 1),
                avg_execution_time_ms: totals.avg_time_ms(),
                period_days: days,
            })
            .collect())
    }

    /// Daily quality of the last `days`, oldest day first; idle days are absent
    pub async fn quality_trend(&self, days: i64) -> Result<Vec<QualityTrendPoint>> {
        let since = Utc::now() - Duration::days(days);
        let executions = self.store.select_executions(since).await?;

        let mut by_day: BTreeMap<NaiveDate, ExecutionTotals> = BTreeMap::new();
        for execution in &executions {
            by_day
                .entry(execution.created_at.date_naive())
                .or_default()
                .add(execution);
        }

        Ok(by_day
            .into_iter()
            .map(|(date, totals)| QualityTrendPoint {
                date,
                avg_quality: round_to(totals.avg_quality(), 1),
                task_count: totals.count,
                success_rate: round_to(totals.success_rate(), 2),
            })
            .collect())
    }

    /// Per-phase knowledge and execution figures, phases in name order
    pub async fn phase_overview(&self) -> Result<Vec<PhaseSummary>> {
        let items = self.store.select_knowledge(&KnowledgeQuery::new()).await?;
        let executions = self
            .store
            .select_executions(DateTime::<Utc>::default())
            .await?;

        let mut phases: BTreeMap<String, (Vec<KnowledgeItem>, ExecutionTotals)> = BTreeMap::new();
        for item in items {
            if let Some(phase) = item.phase.clone().filter(|p| !p.is_empty()) {
                phases.entry(phase).or_default().0.push(item);
            }
        }
        for execution in &executions {
            if let Some(phase) = execution.phase.as_deref().filter(|p| !p.is_empty()) {
                phases.entry(phase.to_string()).or_default().1.add(execution);
            }
        }

        Ok(phases
            .into_iter()
            .map(|(phase, (items, totals))| {
                let count = items.len();
                let rating_sum: f64 = items.iter().map(|k| k.avg_rating).sum();
                PhaseSummary {
                    phase,
                    knowledge_count: count,
                    learning_count: items
                        .iter()
                        .filter(|k| k.knowledge_type == KnowledgeType::Learning)
                        .count(),
                    avg_rating: if count == 0 {
                        0.0
                    } else {
                        round_to(rating_sum / count as f64, 1)
                    },
                    total_usage: items.iter().map(|k| u64::from(k.usage_count)).sum(),
                    task_count: totals.count,
                    avg_task_quality: round_to(totals.avg_quality(), 1),
                    success_rate: round_to(totals.success_rate(), 2),
                }
            })
            .collect())
    }
}

/// Composite health on a 0-10 scale
pub fn health_score(item: &KnowledgeItem, now: DateTime<Utc>) -> f64 {
    let rating = (item.avg_rating / 10.0).clamp(0.0, 1.0);
    let reliability = (1.0 - item.failure_rate).clamp(0.0, 1.0);
    let usage = ((1.0 + f64::from(item.usage_count)).ln() / (1.0 + FULL_USAGE).ln()).min(1.0);

    let last_touch = item.last_used_at.unwrap_or(item.created_at);
    let days_idle = (now - last_touch).num_seconds().max(0) as f64 / 86_400.0;
    let recency = 0.5f64.powf(days_idle / RECENCY_HALF_LIFE_DAYS);

    (rating * 0.4 + reliability * 0.3 + usage * 0.2 + recency * 0.1) * 10.0
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SecurityLevel;

    fn item(rating: f64, usage: u32, failure_rate: f64, idle_days: i64) -> KnowledgeItem {
        let now = Utc::now();
        KnowledgeItem {
            id: KnowledgeId::new(),
            created_at: now - Duration::days(idle_days),
            updated_at: now,
            title: "k".to_string(),
            content: "c".to_string(),
            summary: None,
            embedding: None,
            knowledge_type: KnowledgeType::Solution,
            tags: vec![],
            phase: None,
            author: None,
            complexity: 5,
            security_level: SecurityLevel::Public,
            related_commits: vec![],
            usage_count: usage,
            avg_rating: rating,
            failure_count: 0,
            failure_rate,
            last_used_at: None,
            is_archived: false,
            archived_at: None,
            retention_days: 90,
        }
    }

    #[test]
    fn test_perfect_item_is_fully_healthy() {
        let score = health_score(&item(10.0, 20, 0.0, 0), Utc::now());
        assert!((score - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_unused_item_health() {
        // rating 0, reliability 1, usage 0, recency 1
        let score = health_score(&item(0.0, 0, 0.0, 0), Utc::now());
        assert!((score - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_recency_halves_after_thirty_days() {
        let now = Utc::now();
        let fresh = health_score(&item(0.0, 0, 1.0, 0), now);
        let stale = health_score(&item(0.0, 0, 1.0, 30), now);
        assert!((fresh - 1.0).abs() < 0.01);
        assert!((stale - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_execution_totals_of_nothing_are_zero() {
        let totals = ExecutionTotals::default();
        assert_eq!(totals.success_rate(), 0.0);
        assert_eq!(totals.avg_quality(), 0.0);
        assert_eq!(totals.avg_time_ms(), 0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(8.04, 1), 8.0);
        assert_eq!(round_to(0.456, 2), 0.46);
    }
}
