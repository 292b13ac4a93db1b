//! Agent training loop
//!
//! Wraps a task execution: knowledge is retrieved into the prompt before the
//! task runs, and afterwards the solution is captured as a learning while the
//! knowledge that was used gets its usage statistics updated.

use crate::embeddings::EmbeddingProvider;
use crate::error::{CirculateError, Result};
use crate::journal::{DevJournalLogger, DEFAULT_PHASE};
use crate::rag::{EnhancedPrompt, RagEngine};
use crate::storage::{KnowledgeOrder, KnowledgeQuery, KnowledgeStore};
use crate::types::{
    AgentExecution, AgentTask, ArchiveCounts, DevLogEntry, ExecutionStatus, KnowledgeId,
    KnowledgeItem, KnowledgeType, LearningCurveMetrics, RetrievedDocument, SearchOptions,
    TaskExecution,
};
use chrono::Utc;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const OBSERVED_TOP_K: usize = 5;
const OBSERVED_MIN_SIMILARITY: f64 = 0.6;

const LEARNING_TITLE_CHARS: usize = 80;
const MAX_COMPLEXITY: f64 = 10.0;

/// Usage count needed before an item's rating is ranked
const MIN_RATED_USAGE: u32 = 3;

/// Learning items per nominal batch of tasks
const GROWTH_BATCH: f64 = 10.0;

pub const DEFAULT_RANKING_LIMIT: usize = 10;

/// Accepted task quality ratings
pub const QUALITY_RANGE: RangeInclusive<f64> = 1.0..=10.0;

/// Before/after hooks around agent tasks
pub struct AgentTrainingSystem {
    store: Arc<dyn KnowledgeStore>,
    rag: RagEngine,
    journal: DevJournalLogger,
    agent: String,
}

impl AgentTrainingSystem {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        knowledge_dir: impl Into<PathBuf>,
        author: impl Into<String>,
    ) -> Self {
        let agent = author.into();
        Self {
            rag: RagEngine::new(store.clone(), embedder.clone()),
            journal: DevJournalLogger::new(store.clone(), embedder, knowledge_dir, agent.clone()),
            store,
            agent,
        }
    }

    /// Build the knowledge-enhanced prompt for `task`
    pub async fn before_task(&self, task: &AgentTask) -> EnhancedPrompt {
        let preview: String = task.description.chars().take(50).collect();
        info!("Retrieving knowledge for task: {}...", preview);

        // Type-filtered retrieval is only observed; the prompt uses its own
        let observed = self
            .rag
            .retrieve(
                &task.description,
                &SearchOptions {
                    top_k: OBSERVED_TOP_K,
                    min_similarity: OBSERVED_MIN_SIMILARITY,
                    filter_tags: vec![task.task_type.clone()],
                    ..SearchOptions::default()
                },
            )
            .await;
        debug!(
            "{} documents tagged '{}' match the task",
            observed.len(),
            task.task_type
        );

        let base_prompt = format!(
            "You are an expert {} assistant. Your task complexity is {}/10.",
            task.task_type, task.complexity
        );
        let enhanced = self.rag.enhance_prompt(&task.description, &base_prompt).await;

        info!("Retrieved {} relevant documents", enhanced.sources.len());
        for (i, source) in enhanced.sources.iter().enumerate() {
            debug!(
                "  {}. {} ({:.1}% relevance)",
                i + 1,
                source.title,
                source.score * 100.0
            );
        }

        enhanced
    }

    /// Capture the outcome of a task and credit the knowledge it used
    ///
    /// `phase` labels the new learning; "Unknown" when absent. Quality
    /// outside 1-10 is rejected before anything is written. Once the learning
    /// is stored the call succeeds: failed usage credits and a failed
    /// execution record are logged and skipped.
    pub async fn after_task(
        &self,
        execution: &TaskExecution,
        phase: Option<&str>,
    ) -> Result<KnowledgeId> {
        validate_quality(execution.quality)?;

        let title: String = execution
            .description
            .chars()
            .take(LEARNING_TITLE_CHARS)
            .collect();
        let phase = phase.filter(|p| !p.is_empty());

        let mut entry = DevLogEntry::new(
            format!("Solution: {}", title),
            execution.solution.clone(),
            KnowledgeType::Learning,
        );
        entry.tags = Some(vec!["solution".to_string(), "training".to_string()]);
        entry.complexity = Some(complexity_from_time(execution.time_spent));
        entry.phase = phase.map(str::to_string);

        let id = self.journal.log_development(&entry).await?;

        let mut credited = 0;
        for used in &execution.used_knowledge {
            match self.update_knowledge_stats(*used, execution.quality).await {
                Ok(()) => credited += 1,
                Err(e) => warn!("Failed to update stats for knowledge {}: {}", used, e),
            }
        }

        let record = AgentExecution {
            agent_name: self.agent.clone(),
            task_description: execution.description.clone(),
            phase: Some(phase.unwrap_or(DEFAULT_PHASE).to_string()),
            status: ExecutionStatus::Success,
            quality_score: execution.quality,
            execution_time_ms: minutes_to_ms(execution.time_spent),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_execution(&record).await {
            warn!("Failed to record execution: {}", e);
        }

        info!(
            "Learning logged, {}/{} knowledge items credited",
            credited,
            execution.used_knowledge.len()
        );
        Ok(id)
    }

    /// Fold `quality` into an item's running mean; absent ids are skipped
    pub async fn update_knowledge_stats(&self, id: KnowledgeId, quality: f64) -> Result<()> {
        match self.store.record_usage(id, quality, Utc::now()).await? {
            Some(item) => debug!(
                "Knowledge {} now used {} times, rating {:.2}",
                id, item.usage_count, item.avg_rating
            ),
            None => debug!("Knowledge {} not found, skipping stats update", id),
        }
        Ok(())
    }

    /// Learning progress for `phase`; zeros when nothing can be read
    pub async fn learning_curve(&self, phase: &str) -> LearningCurveMetrics {
        let query = KnowledgeQuery::new()
            .phase(phase)
            .knowledge_type(KnowledgeType::Learning)
            .order(KnowledgeOrder::OldestFirst);

        let items = match self.store.select_knowledge(&query).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to read learning curve for {}: {}", phase, e);
                return LearningCurveMetrics::default();
            }
        };

        if items.is_empty() {
            return LearningCurveMetrics::default();
        }

        let count = items.len() as f64;
        LearningCurveMetrics {
            tasks_completed: items.len(),
            avg_quality: items.iter().map(|k| k.avg_rating).sum::<f64>() / count,
            avg_time_spent: 0.0,
            knowledge_growth: count / GROWTH_BATCH,
        }
    }

    /// Active items by usage; score is `usage_count / 100`, unclamped
    pub async fn most_used_knowledge(&self, limit: usize) -> Vec<RetrievedDocument> {
        let query = KnowledgeQuery::new()
            .active()
            .order(KnowledgeOrder::MostUsed)
            .limit(limit);

        match self.store.select_knowledge(&query).await {
            Ok(items) => items
                .into_iter()
                .map(|item| {
                    let score = f64::from(item.usage_count) / 100.0;
                    ranked(item, score)
                })
                .collect(),
            Err(e) => {
                warn!("Failed to get most used knowledge: {}", e);
                Vec::new()
            }
        }
    }

    /// Active items used at least three times, by rating; score is `rating / 10`
    pub async fn highest_rated_knowledge(&self, limit: usize) -> Vec<RetrievedDocument> {
        let query = KnowledgeQuery::new()
            .active()
            .min_usage_count(MIN_RATED_USAGE)
            .order(KnowledgeOrder::HighestRated)
            .limit(limit);

        match self.store.select_knowledge(&query).await {
            Ok(items) => items
                .into_iter()
                .map(|item| {
                    let score = item.avg_rating / 10.0;
                    ranked(item, score)
                })
                .collect(),
            Err(e) => {
                warn!("Failed to get highest rated knowledge: {}", e);
                Vec::new()
            }
        }
    }

    /// Run the store's archival policy; zeros on failure
    pub async fn archive_unused_knowledge(&self) -> ArchiveCounts {
        match self.store.archive_old_knowledge().await {
            Ok(counts) => {
                info!(
                    "Archived {} items, compressed {} items",
                    counts.archived, counts.compressed
                );
                counts
            }
            Err(e) => {
                warn!("Failed to archive knowledge: {}", e);
                ArchiveCounts::default()
            }
        }
    }
}

fn validate_quality(quality: f64) -> Result<()> {
    if QUALITY_RANGE.contains(&quality) {
        Ok(())
    } else {
        Err(CirculateError::Validation(format!(
            "Quality must be between 1 and 10, got {}",
            quality
        )))
    }
}

fn minutes_to_ms(minutes: f64) -> u64 {
    if minutes.is_finite() && minutes > 0.0 {
        (minutes * 60_000.0).round() as u64
    } else {
        0
    }
}

/// One complexity point per ten minutes, at most 10
fn complexity_from_time(minutes: f64) -> u8 {
    (minutes / 10.0).ceil().clamp(0.0, MAX_COMPLEXITY) as u8
}

fn ranked(item: KnowledgeItem, score: f64) -> RetrievedDocument {
    RetrievedDocument {
        id: item.id,
        title: item.title,
        content: item.content,
        summary: item.summary,
        score,
        knowledge_type: item.knowledge_type,
        tags: item.tags,
    }
}
