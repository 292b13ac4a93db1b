//! Common test utilities and helpers
//!
//! An in-memory [`KnowledgeStore`] whose search results and failures can be
//! scripted, and an embedding provider that counts its calls.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use circulate_core::error::{CirculateError, Result};
use circulate_core::storage::{
    HybridSearchRow, KnowledgeOrder, KnowledgePatch, KnowledgeQuery, TextSearchRow,
    VectorSearchRow,
};
use circulate_core::types::{AgentExecution, ArchiveCounts, FailureRecord, NewKnowledge};
use circulate_core::{
    EmbeddingProvider, ExecutionStatus, KnowledgeId, KnowledgeItem, KnowledgeStore,
    KnowledgeType, SecurityLevel, TaskFailure,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory store for exercising the core without SQLite
#[derive(Default)]
pub struct MemoryStore {
    pub items: Mutex<Vec<KnowledgeItem>>,
    pub failures: Mutex<Vec<FailureRecord>>,
    pub executions: Mutex<Vec<AgentExecution>>,
    /// Rows returned verbatim by `hybrid_search`
    pub hybrid_rows: Mutex<Vec<HybridSearchRow>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Fails only `record_usage`, leaving inserts working
    pub fail_usage: AtomicBool,
    pub hybrid_calls: AtomicUsize,
    pub last_hybrid_limit: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_hybrid_rows(rows: Vec<HybridSearchRow>) -> Arc<Self> {
        let store = Self::default();
        *store.hybrid_rows.lock().unwrap() = rows;
        Arc::new(store)
    }

    /// Add a ready-made item, returning its id
    pub fn seed(&self, item: KnowledgeItem) -> KnowledgeId {
        let id = item.id;
        self.items.lock().unwrap().push(item);
        id
    }

    pub fn item(&self, id: KnowledgeId) -> Option<KnowledgeItem> {
        self.items.lock().unwrap().iter().find(|k| k.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn executions(&self) -> Vec<AgentExecution> {
        self.executions.lock().unwrap().clone()
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CirculateError::Database("scripted read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CirculateError::Database("scripted write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn insert_knowledge(&self, row: &NewKnowledge) -> Result<KnowledgeId> {
        self.check_write()?;
        let now = Utc::now();
        let item = KnowledgeItem {
            id: KnowledgeId::new(),
            created_at: now,
            updated_at: now,
            title: row.title.clone(),
            content: row.content.clone(),
            summary: row.summary.clone(),
            embedding: Some(row.embedding.clone()),
            knowledge_type: row.knowledge_type,
            tags: row.tags.clone(),
            phase: Some(row.phase.clone()),
            author: Some(row.author.clone()),
            complexity: row.complexity,
            security_level: row.security_level,
            related_commits: row.related_commits.clone(),
            usage_count: 0,
            avg_rating: 0.0,
            failure_count: 0,
            failure_rate: 0.0,
            last_used_at: None,
            is_archived: false,
            archived_at: None,
            retention_days: 90,
        };
        Ok(self.seed(item))
    }

    async fn get_knowledge(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        self.check_read()?;
        Ok(self.item(id))
    }

    async fn select_knowledge(&self, query: &KnowledgeQuery) -> Result<Vec<KnowledgeItem>> {
        self.check_read()?;
        let mut items: Vec<KnowledgeItem> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|k| query.matches(k))
            .cloned()
            .collect();

        match query.order {
            KnowledgeOrder::NewestFirst => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            KnowledgeOrder::OldestFirst => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            KnowledgeOrder::MostUsed => items.sort_by(|a, b| b.usage_count.cmp(&a.usage_count)),
            KnowledgeOrder::HighestRated => {
                items.sort_by(|a, b| b.avg_rating.total_cmp(&a.avg_rating))
            }
            KnowledgeOrder::HighestFailureRate => {
                items.sort_by(|a, b| b.failure_rate.total_cmp(&a.failure_rate))
            }
        }
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn update_knowledge(&self, id: KnowledgeId, patch: &KnowledgePatch) -> Result<bool> {
        self.check_write()?;
        let mut items = self.items.lock().unwrap();
        let Some(item) = items.iter_mut().find(|k| k.id == id) else {
            return Ok(false);
        };
        if let Some(rating) = patch.avg_rating {
            item.avg_rating = rating;
        }
        if let Some(tags) = &patch.tags {
            item.tags = tags.clone();
        }
        if let Some(archived) = patch.is_archived {
            item.is_archived = archived;
        }
        if let Some(at) = patch.archived_at {
            item.archived_at = Some(at);
        }
        item.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_usage(
        &self,
        id: KnowledgeId,
        rating: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<KnowledgeItem>> {
        self.check_write()?;
        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(CirculateError::Database("scripted usage failure".to_string()));
        }
        let mut items = self.items.lock().unwrap();
        let Some(item) = items.iter_mut().find(|k| k.id == id) else {
            return Ok(None);
        };
        let count = f64::from(item.usage_count);
        item.avg_rating = (item.avg_rating * count + rating) / (count + 1.0);
        item.usage_count += 1;
        item.last_used_at = Some(at);
        Ok(Some(item.clone()))
    }

    async fn record_failure_hit(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        self.check_write()?;
        let mut items = self.items.lock().unwrap();
        let Some(item) = items.iter_mut().find(|k| k.id == id) else {
            return Ok(None);
        };
        item.failure_count += 1;
        item.failure_rate = f64::from(item.failure_count) / f64::from(item.usage_count.max(1));
        Ok(Some(item.clone()))
    }

    async fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<TextSearchRow>> {
        self.check_read()?;
        let needle = query.to_lowercase();
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|k| !k.is_archived)
            .filter(|k| {
                k.title.to_lowercase().contains(&needle)
                    || k.content.to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|k| TextSearchRow {
                id: k.id,
                title: k.title.clone(),
                content: k.content.clone(),
                summary: k.summary.clone(),
                knowledge_type: k.knowledge_type,
                tags: k.tags.clone(),
            })
            .collect())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorSearchRow>> {
        self.check_read()?;
        let mut rows: Vec<VectorSearchRow> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|k| !k.is_archived)
            .filter_map(|k| {
                let stored = k.embedding.as_deref()?;
                let similarity =
                    f64::from(circulate_core::embeddings::cosine_similarity(embedding, stored));
                (similarity >= threshold).then(|| VectorSearchRow {
                    id: k.id,
                    title: k.title.clone(),
                    content: k.content.clone(),
                    similarity,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn hybrid_search(
        &self,
        _query: &str,
        _embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<HybridSearchRow>> {
        self.hybrid_calls.fetch_add(1, Ordering::SeqCst);
        self.last_hybrid_limit.store(limit, Ordering::SeqCst);
        self.check_read()?;
        Ok(self
            .hybrid_rows
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn archive_old_knowledge(&self) -> Result<ArchiveCounts> {
        self.check_write()?;
        Ok(ArchiveCounts::default())
    }

    async fn insert_failure(&self, failure: &TaskFailure) -> Result<()> {
        self.check_write()?;
        let mut failures = self.failures.lock().unwrap();
        let id = failures.len() as i64 + 1;
        failures.push(FailureRecord {
            id,
            task_id: failure.task_id.clone(),
            description: failure.description.clone(),
            error_message: failure.error_message.clone(),
            attempted_knowledge: failure.attempted_knowledge.clone(),
            timestamp: failure.timestamp,
        });
        Ok(())
    }

    async fn select_failures(&self, since: DateTime<Utc>) -> Result<Vec<FailureRecord>> {
        self.check_read()?;
        let mut failures: Vec<FailureRecord> = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.timestamp >= since)
            .cloned()
            .collect();
        failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(failures)
    }

    async fn record_execution(&self, execution: &AgentExecution) -> Result<()> {
        self.check_write()?;
        self.executions.lock().unwrap().push(execution.clone());
        Ok(())
    }

    async fn select_executions(&self, since: DateTime<Utc>) -> Result<Vec<AgentExecution>> {
        self.check_read()?;
        let mut executions: Vec<AgentExecution> = self
            .executions
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(executions)
    }
}

/// Embedding provider returning a fixed vector and counting calls
pub struct ScriptedEmbedder {
    pub vector: Vec<f32>,
    pub summary: String,
    pub fail_embed: AtomicBool,
    pub embed_calls: AtomicUsize,
    pub summarize_calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vector: vec![1.0, 0.0, 0.0, 0.0],
            summary: "A scripted summary.".to_string(),
            fail_embed: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let embedder = Self::new();
        embedder.fail_embed.store(true, Ordering::SeqCst);
        embedder
    }

    pub fn embed_count(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_count(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(CirculateError::Embedding("scripted embed failure".to_string()));
        }
        Ok(self.vector.clone())
    }

    async fn summarize(&self, _text: &str, _instruction: &str) -> Result<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Hybrid row with neutral filter fields
pub fn hybrid_row(title: &str, score: f64) -> HybridSearchRow {
    HybridSearchRow {
        id: KnowledgeId::new(),
        title: title.to_string(),
        content: format!("{} content", title),
        summary: None,
        knowledge_type: KnowledgeType::Solution,
        tags: vec![],
        phase: None,
        security_level: SecurityLevel::Public,
        combined_score: score,
    }
}

/// Knowledge item with the given statistics, created `age_days` ago
pub fn knowledge_item(
    title: &str,
    rating: f64,
    usage: u32,
    failure_rate: f64,
    age_days: i64,
) -> KnowledgeItem {
    let created = Utc::now() - Duration::days(age_days);
    KnowledgeItem {
        id: KnowledgeId::new(),
        created_at: created,
        updated_at: created,
        title: title.to_string(),
        content: format!("{} content", title),
        summary: None,
        embedding: None,
        knowledge_type: KnowledgeType::Solution,
        tags: vec![],
        phase: Some("Phase 1".to_string()),
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

/// Execution of `agent` finished `age_hours` ago
pub fn execution(
    agent: &str,
    phase: Option<&str>,
    status: ExecutionStatus,
    quality: f64,
    time_ms: u64,
    age_hours: i64,
) -> AgentExecution {
    AgentExecution {
        agent_name: agent.to_string(),
        task_description: format!("{} task", agent),
        phase: phase.map(str::to_string),
        status,
        quality_score: quality,
        execution_time_ms: time_ms,
        created_at: Utc::now() - Duration::hours(age_hours),
    }
}

pub fn failure(description: &str, error: &str, attempted: Vec<KnowledgeId>) -> TaskFailure {
    TaskFailure {
        task_id: uuid::Uuid::new_v4().to_string(),
        description: description.to_string(),
        error_message: error.to_string(),
        attempted_knowledge: attempted,
        timestamp: Utc::now(),
    }
}
