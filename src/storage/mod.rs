//! Storage layer for the knowledge base
//!
//! The [`KnowledgeStore`] trait is the only way the core touches persisted
//! knowledge. Search procedures return typed rows; callers map them into
//! [`RetrievedDocument`](crate::types::RetrievedDocument)s at the boundary.

pub mod sqlite;

use crate::error::Result;
use crate::types::{
    AgentExecution, ArchiveCounts, FailureRecord, KnowledgeId, KnowledgeItem, KnowledgeType,
    NewKnowledge, SecurityLevel, TaskFailure,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteKnowledgeStore;

/// Storage backend trait defining all required operations
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert a new knowledge item, returning its store-assigned id
    async fn insert_knowledge(&self, item: &NewKnowledge) -> Result<KnowledgeId>;

    /// Fetch a knowledge item; `None` when absent
    async fn get_knowledge(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>>;

    /// Filtered, ordered, limited read
    async fn select_knowledge(&self, query: &KnowledgeQuery) -> Result<Vec<KnowledgeItem>>;

    /// Apply a partial update; returns false when the id does not exist
    async fn update_knowledge(&self, id: KnowledgeId, patch: &KnowledgePatch) -> Result<bool>;

    /// Atomically fold one rating into the running mean
    ///
    /// `avg_rating ← (avg_rating·usage_count + rating) / (usage_count + 1)`,
    /// `usage_count ← usage_count + 1`, `last_used_at ← at`.
    /// Returns the updated item, or `None` when the id does not exist.
    async fn record_usage(
        &self,
        id: KnowledgeId,
        rating: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<KnowledgeItem>>;

    /// Atomically count one failure against an item
    ///
    /// `failure_count ← failure_count + 1`,
    /// `failure_rate ← failure_count / max(usage_count, 1)`.
    async fn record_failure_hit(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>>;

    /// Full-text search; rows carry no ranking score
    async fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<TextSearchRow>>;

    /// Vector similarity search, rows with `similarity >= threshold`
    async fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorSearchRow>>;

    /// Blended lexical + vector search; weighting is store-owned
    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<HybridSearchRow>>;

    /// Store-side archival policy
    async fn archive_old_knowledge(&self) -> Result<ArchiveCounts>;

    /// Persist a task failure record
    async fn insert_failure(&self, failure: &TaskFailure) -> Result<()>;

    /// Failures with `timestamp >= since`, newest first
    async fn select_failures(&self, since: DateTime<Utc>) -> Result<Vec<FailureRecord>>;

    /// Append to the agent execution ledger
    async fn record_execution(&self, execution: &AgentExecution) -> Result<()>;

    /// Executions with `created_at >= since`, oldest first
    async fn select_executions(&self, since: DateTime<Utc>) -> Result<Vec<AgentExecution>>;
}

/// Sort order for knowledge reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnowledgeOrder {
    #[default]
    NewestFirst,
    OldestFirst,
    MostUsed,
    HighestRated,
    HighestFailureRate,
}

/// Filters for [`KnowledgeStore::select_knowledge`]; unset fields do not filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeQuery {
    pub phase: Option<String>,
    pub knowledge_type: Option<KnowledgeType>,
    pub archived: Option<bool>,
    /// Array containment: every listed tag must be present
    pub tags_all: Vec<String>,
    pub min_usage_count: Option<u32>,
    pub min_failure_rate: Option<f64>,
    pub order: KnowledgeOrder,
    pub limit: Option<usize>,
}

impl KnowledgeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn knowledge_type(mut self, knowledge_type: KnowledgeType) -> Self {
        self.knowledge_type = Some(knowledge_type);
        self
    }

    pub fn active(mut self) -> Self {
        self.archived = Some(false);
        self
    }

    pub fn tags_all(mut self, tags: &[String]) -> Self {
        self.tags_all = tags.to_vec();
        self
    }

    pub fn min_usage_count(mut self, count: u32) -> Self {
        self.min_usage_count = Some(count);
        self
    }

    pub fn min_failure_rate(mut self, rate: f64) -> Self {
        self.min_failure_rate = Some(rate);
        self
    }

    pub fn order(mut self, order: KnowledgeOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `item` passes every filter (ordering and limit excluded)
    pub fn matches(&self, item: &KnowledgeItem) -> bool {
        if let Some(phase) = &self.phase {
            if item.phase.as_deref() != Some(phase.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.knowledge_type {
            if item.knowledge_type != kind {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if item.is_archived != archived {
                return false;
            }
        }
        if !self.tags_all.iter().all(|t| item.tags.contains(t)) {
            return false;
        }
        if let Some(min) = self.min_usage_count {
            if item.usage_count < min {
                return false;
            }
        }
        if let Some(min) = self.min_failure_rate {
            if item.failure_rate < min {
                return false;
            }
        }
        true
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgePatch {
    pub avg_rating: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub is_archived: Option<bool>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl KnowledgePatch {
    pub fn is_empty(&self) -> bool {
        self.avg_rating.is_none()
            && self.tags.is_none()
            && self.is_archived.is_none()
            && self.archived_at.is_none()
    }
}

/// Row returned by [`KnowledgeStore::full_text_search`]
#[derive(Debug, Clone, PartialEq)]
pub struct TextSearchRow {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub tags: Vec<String>,
}

/// Row returned by [`KnowledgeStore::vector_search`]
///
/// The procedure reports only identity, text and similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchRow {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

/// Row returned by [`KnowledgeStore::hybrid_search`]
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchRow {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub tags: Vec<String>,
    pub phase: Option<String>,
    pub security_level: SecurityLevel,
    pub combined_score: f64,
}
