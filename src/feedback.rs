//! Failure-driven feedback loop
//!
//! Task failures are persisted for analysis and counted against the
//! knowledge the agent tried. Items whose failure rate passes
//! [`FAILURE_THRESHOLD`] lose rating immediately; aggregate statistics feed
//! archive/improve/split/merge suggestions.

use crate::error::Result;
use crate::storage::{KnowledgeOrder, KnowledgePatch, KnowledgeQuery, KnowledgeStore};
use crate::types::{
    AgentExecution, ExecutionStatus, KnowledgeId, KnowledgeItem, OptimizationSuggestion,
    SuggestionKind, TaskFailure,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Failure rate above which an item's rating is downgraded
pub const FAILURE_THRESHOLD: f64 = 0.3;

/// Rating points lost at a 100% failure rate
const PENALTY_SCALE: f64 = 5.0;
const RATING_FLOOR: f64 = 1.0;

/// Suggestions recommending archive are applied below this rating
const AUTO_ARCHIVE_RATING: f64 = 4.0;

const PROBLEMATIC_FAILURE_RATE: f64 = 0.2;
const TOP_ENTRIES: usize = 5;

pub const DEFAULT_ANALYSIS_DAYS: i64 = 7;
pub const NEEDS_IMPROVEMENT_TAG: &str = "needs-improvement";

/// Agent name on failed executions unless one is given
pub const DEFAULT_AGENT: &str = "agent";

/// Coarse error classes, matched by keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Timeout,
    Network,
    Authentication,
    NotFound,
    Syntax,
    Type,
    Permission,
    Other,
}

impl ErrorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Network => "Network Error",
            ErrorCategory::Authentication => "Authentication",
            ErrorCategory::NotFound => "Not Found",
            ErrorCategory::Syntax => "Syntax Error",
            ErrorCategory::Type => "Type Error",
            ErrorCategory::Permission => "Permission Denied",
            ErrorCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const ERROR_KEYWORDS: &[(&[&str], ErrorCategory)] = &[
    (&["timeout", "timed out"], ErrorCategory::Timeout),
    (&["network", "connection"], ErrorCategory::Network),
    (&["auth", "unauthorized"], ErrorCategory::Authentication),
    (&["not found", "404"], ErrorCategory::NotFound),
    (&["syntax", "parse"], ErrorCategory::Syntax),
    (&["type", "undefined"], ErrorCategory::Type),
    (&["permission", "forbidden"], ErrorCategory::Permission),
];

/// Case-insensitive, first match wins
pub fn categorize_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    ERROR_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::Other)
}

/// Count categories in first-seen order, then sort by count descending
pub(crate) fn count_categories<'a, I>(messages: I) -> Vec<FailureReasonCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<FailureReasonCount> = Vec::new();
    for message in messages {
        let reason = categorize_error(message).label().to_string();
        match counts.iter_mut().find(|c| c.reason == reason) {
            Some(entry) => entry.count += 1,
            None => counts.push(FailureReasonCount { reason, count: 1 }),
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReasonCount {
    pub reason: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblematicKnowledge {
    pub id: KnowledgeId,
    pub title: String,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub total_failures: usize,
    pub top_failure_reasons: Vec<FailureReasonCount>,
    pub most_problematic_knowledge: Vec<ProblematicKnowledge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub archived: usize,
    pub improved: usize,
}

/// Records failures and tunes knowledge quality from them
pub struct FeedbackLoop {
    store: Arc<dyn KnowledgeStore>,
    agent: String,
}

impl FeedbackLoop {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            agent: DEFAULT_AGENT.to_string(),
        }
    }

    /// Name recorded on the failed executions this loop writes
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Persist `failure`, charge it to every attempted item and log it as a
    /// failed execution
    pub async fn record_failure(&self, failure: &TaskFailure) -> Result<()> {
        let preview: String = failure.description.chars().take(50).collect();
        info!("Recording task failure: {}...", preview);

        self.store.insert_failure(failure).await?;

        for id in &failure.attempted_knowledge {
            self.update_failure_count(*id).await?;
        }

        let execution = AgentExecution {
            agent_name: self.agent.clone(),
            task_description: failure.description.clone(),
            phase: None,
            status: ExecutionStatus::Failed,
            quality_score: 0.0,
            execution_time_ms: 0,
            created_at: failure.timestamp,
        };
        if let Err(e) = self.store.record_execution(&execution).await {
            warn!("Failed to record failed execution: {}", e);
        }

        debug!(
            "Failure recorded against {} knowledge items",
            failure.attempted_knowledge.len()
        );
        Ok(())
    }

    async fn update_failure_count(&self, id: KnowledgeId) -> Result<()> {
        let Some(item) = self.store.record_failure_hit(id).await? else {
            debug!("Knowledge {} not found, skipping failure count", id);
            return Ok(());
        };

        if item.failure_rate > FAILURE_THRESHOLD {
            self.downgrade(&item).await?;
        }
        Ok(())
    }

    async fn downgrade(&self, item: &KnowledgeItem) -> Result<()> {
        let penalty = item.failure_rate * PENALTY_SCALE;
        let new_rating = (item.avg_rating - penalty).max(RATING_FLOOR);

        let patch = KnowledgePatch {
            avg_rating: Some(new_rating),
            ..Default::default()
        };
        if self.store.update_knowledge(item.id, &patch).await? {
            warn!(
                "Knowledge downgraded: \"{}\" ({:.1} -> {:.1})",
                item.title, item.avg_rating, new_rating
            );
        }
        Ok(())
    }

    /// Rule-based suggestions over all active items; one item may match several rules
    pub async fn generate_optimization_suggestions(&self) -> Result<Vec<OptimizationSuggestion>> {
        let items = self
            .store
            .select_knowledge(&KnowledgeQuery::new().active())
            .await?;

        Ok(items.iter().flat_map(suggestions_for).collect())
    }

    /// Failure categories within the last `days`, plus the worst items overall
    ///
    /// Only the failure counts are windowed; the problematic-knowledge list
    /// covers every item regardless of age.
    pub async fn failure_analysis(&self, days: i64) -> Result<FailureAnalysis> {
        let since = Utc::now() - Duration::days(days);
        let failures = self.store.select_failures(since).await?;

        if failures.is_empty() {
            return Ok(FailureAnalysis::default());
        }

        let mut top_failure_reasons =
            count_categories(failures.iter().map(|f| f.error_message.as_str()));
        top_failure_reasons.truncate(TOP_ENTRIES);

        let query = KnowledgeQuery::new()
            .min_failure_rate(PROBLEMATIC_FAILURE_RATE)
            .order(KnowledgeOrder::HighestFailureRate)
            .limit(TOP_ENTRIES);
        let most_problematic_knowledge = self
            .store
            .select_knowledge(&query)
            .await?
            .into_iter()
            .map(|item| ProblematicKnowledge {
                id: item.id,
                title: item.title,
                failure_rate: item.failure_rate,
            })
            .collect();

        Ok(FailureAnalysis {
            total_failures: failures.len(),
            top_failure_reasons,
            most_problematic_knowledge,
        })
    }

    /// Apply archive and improve suggestions
    ///
    /// Archive suggestions are only applied below rating 4. Improve appends
    /// the `needs-improvement` tag to the existing tags, even if already
    /// present. Split and merge are left for a human.
    pub async fn apply_optimizations(
        &self,
        suggestions: &[OptimizationSuggestion],
    ) -> Result<OptimizationOutcome> {
        let mut outcome = OptimizationOutcome::default();

        for suggestion in suggestions {
            match suggestion.suggestion {
                SuggestionKind::Archive if suggestion.current_rating < AUTO_ARCHIVE_RATING => {
                    let patch = KnowledgePatch {
                        is_archived: Some(true),
                        archived_at: Some(Utc::now()),
                        ..Default::default()
                    };
                    if self
                        .store
                        .update_knowledge(suggestion.knowledge_id, &patch)
                        .await?
                    {
                        outcome.archived += 1;
                        info!("Auto-archived knowledge: {}", suggestion.knowledge_id);
                    }
                }
                SuggestionKind::Improve => {
                    let Some(current) = self.store.get_knowledge(suggestion.knowledge_id).await?
                    else {
                        continue;
                    };
                    let mut tags = current.tags;
                    tags.push(NEEDS_IMPROVEMENT_TAG.to_string());
                    let patch = KnowledgePatch {
                        tags: Some(tags),
                        ..Default::default()
                    };
                    if self
                        .store
                        .update_knowledge(suggestion.knowledge_id, &patch)
                        .await?
                    {
                        outcome.improved += 1;
                        info!("Flagged for improvement: {}", suggestion.knowledge_id);
                    }
                }
                _ => {}
            }
        }

        Ok(outcome)
    }
}

fn suggestions_for(item: &KnowledgeItem) -> Vec<OptimizationSuggestion> {
    let suggest = |suggestion: SuggestionKind, reason: &str| OptimizationSuggestion {
        knowledge_id: item.id,
        current_rating: item.avg_rating,
        usage_count: item.usage_count,
        failure_rate: item.failure_rate,
        suggestion,
        reason: reason.to_string(),
    };

    let mut out = Vec::new();

    if item.failure_rate > 0.5 && item.usage_count >= 3 {
        out.push(if item.avg_rating < 5.0 {
            suggest(
                SuggestionKind::Archive,
                "High failure rate and low rating - consider archiving",
            )
        } else {
            suggest(
                SuggestionKind::Improve,
                "High failure rate but decent rating - needs improvement",
            )
        });
    }

    if item.usage_count < 2 && item.avg_rating > 8.0 && item.days_since_creation() > 30 {
        out.push(suggest(
            SuggestionKind::Split,
            "High quality but low usage - might be too specific, consider splitting",
        ));
    }

    if item.usage_count > 20 && item.avg_rating > 8.0 {
        out.push(suggest(
            SuggestionKind::Merge,
            "Very popular and high quality - check for similar items to merge",
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KnowledgeType, SecurityLevel};

    fn item(rating: f64, usage: u32, failure_rate: f64, age_days: i64) -> KnowledgeItem {
        let created = Utc::now() - Duration::days(age_days);
        KnowledgeItem {
            id: KnowledgeId::new(),
            created_at: created,
            updated_at: created,
            title: "item".to_string(),
            content: "content".to_string(),
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
    fn test_categorize_error_first_match_wins() {
        assert_eq!(categorize_error("Request TIMED OUT"), ErrorCategory::Timeout);
        assert_eq!(
            categorize_error("connection timeout"),
            ErrorCategory::Timeout
        );
        assert_eq!(categorize_error("Network unreachable"), ErrorCategory::Network);
        assert_eq!(categorize_error("401 Unauthorized"), ErrorCategory::Authentication);
        assert_eq!(categorize_error("HTTP 404"), ErrorCategory::NotFound);
        assert_eq!(categorize_error("JSON parse error"), ErrorCategory::Syntax);
        assert_eq!(
            categorize_error("x is undefined"),
            ErrorCategory::Type
        );
        assert_eq!(categorize_error("Forbidden"), ErrorCategory::Permission);
        assert_eq!(categorize_error("disk full"), ErrorCategory::Other);
    }

    #[test]
    fn test_count_categories_orders_by_count() {
        let counts = count_categories(["disk full", "timeout", "timed out", "404"]);
        assert_eq!(counts[0].reason, "Timeout");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].reason, "Other");
        assert_eq!(counts[2].reason, "Not Found");
    }

    #[test]
    fn test_high_failure_low_rating_suggests_archive() {
        let suggestions = suggestions_for(&item(3.0, 10, 0.6, 5));
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].suggestion, SuggestionKind::Archive);
    }

    #[test]
    fn test_high_failure_decent_rating_suggests_improve() {
        let suggestions = suggestions_for(&item(6.0, 10, 0.6, 5));
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].suggestion, SuggestionKind::Improve);
    }

    #[test]
    fn test_split_needs_age() {
        assert!(suggestions_for(&item(9.0, 1, 0.0, 10)).is_empty());
        let suggestions = suggestions_for(&item(9.0, 1, 0.0, 45));
        assert_eq!(suggestions[0].suggestion, SuggestionKind::Split);
    }

    #[test]
    fn test_rules_are_independent() {
        // Popular, well rated and failing: improve and merge both apply
        let suggestions = suggestions_for(&item(9.0, 25, 0.6, 5));
        let kinds: Vec<_> = suggestions.iter().map(|s| s.suggestion).collect();
        assert_eq!(kinds, vec![SuggestionKind::Improve, SuggestionKind::Merge]);
    }
}
