//! Retrieval-augmented generation over the knowledge base
//!
//! Every read here fails closed: an agent about to act gets degraded context
//! (an empty list or `None`) instead of an error, and the cause is logged.

use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::storage::{
    HybridSearchRow, KnowledgeOrder, KnowledgeQuery, KnowledgeStore, TextSearchRow,
    VectorSearchRow,
};
use crate::types::{KnowledgeId, KnowledgeItem, KnowledgeType, RetrievedDocument, SearchOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Documents pulled into an enhanced prompt
const PROMPT_CONTEXT_DOCS: usize = 3;

/// Content characters shown when a document has no summary
const PROMPT_EXCERPT_CHARS: usize = 500;

/// Default limit for text and tag lookups
pub const DEFAULT_LOOKUP_LIMIT: usize = 10;

/// Default threshold and limit for vector-only search
pub const DEFAULT_VECTOR_THRESHOLD: f64 = 0.7;
pub const DEFAULT_VECTOR_LIMIT: usize = 5;

/// Score reported by lookups that carry no ranking signal
const UNRANKED_SCORE: f64 = 1.0;

/// Prompt plus the documents it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    pub prompt: String,
    pub sources: Vec<RetrievedDocument>,
}

/// Hybrid retrieval, post-filtering and prompt building
pub struct RagEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RagEngine {
    pub fn new(store: Arc<dyn KnowledgeStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Hybrid search filtered by tags, phase, security level and score floor
    ///
    /// Over-fetches `top_k * 2` candidates, filters them in store order and
    /// keeps the first `top_k`. Never fails.
    pub async fn retrieve(&self, query: &str, options: &SearchOptions) -> Vec<RetrievedDocument> {
        match self.try_retrieve(query, options).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("RAG retrieval failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let embedding = self.embedder.embed(query).await?;
        let candidates = self
            .store
            .hybrid_search(query, &embedding, options.top_k.saturating_mul(2))
            .await?;
        debug!("Hybrid search returned {} candidates", candidates.len());

        Ok(candidates
            .into_iter()
            .filter(|row| passes_filters(row, options))
            .take(options.top_k)
            .map(from_hybrid_row)
            .collect())
    }

    /// Prepend retrieved context to `base_prompt` for `task`
    ///
    /// Returns `base_prompt` untouched and no sources when nothing relevant
    /// is found.
    pub async fn enhance_prompt(&self, task: &str, base_prompt: &str) -> EnhancedPrompt {
        let options = SearchOptions {
            top_k: PROMPT_CONTEXT_DOCS,
            ..SearchOptions::default()
        };
        let sources = self.retrieve(task, &options).await;

        if sources.is_empty() {
            return EnhancedPrompt {
                prompt: base_prompt.to_string(),
                sources,
            };
        }

        EnhancedPrompt {
            prompt: render_prompt(task, base_prompt, &sources),
            sources,
        }
    }

    /// Full-text search; every hit scores 1.0
    pub async fn search_text(&self, query: &str, limit: usize) -> Vec<RetrievedDocument> {
        match self.store.full_text_search(query, limit).await {
            Ok(rows) => rows.into_iter().map(from_text_row).collect(),
            Err(e) => {
                warn!("Text search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Vector-only search scored by cosine similarity
    pub async fn search_vector(
        &self,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> Vec<RetrievedDocument> {
        let result = match self.embedder.embed(query).await {
            Ok(embedding) => self.store.vector_search(&embedding, threshold, limit).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => rows.into_iter().map(from_vector_row).collect(),
            Err(e) => {
                warn!("Vector search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Direct lookup; `None` when absent or unreadable
    pub async fn get_by_id(&self, id: KnowledgeId) -> Option<RetrievedDocument> {
        match self.store.get_knowledge(id).await {
            Ok(item) => item.map(from_item),
            Err(e) => {
                warn!("Knowledge lookup {} failed: {}", id, e);
                None
            }
        }
    }

    /// Active items carrying every tag in `tags`, newest first
    pub async fn get_by_tags(&self, tags: &[String], limit: usize) -> Vec<RetrievedDocument> {
        let query = KnowledgeQuery::new()
            .tags_all(tags)
            .active()
            .order(KnowledgeOrder::NewestFirst)
            .limit(limit);

        match self.store.select_knowledge(&query).await {
            Ok(items) => items.into_iter().map(from_item).collect(),
            Err(e) => {
                warn!("Tag search failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn passes_filters(row: &HybridSearchRow, options: &SearchOptions) -> bool {
    if !options.filter_tags.is_empty()
        && !options.filter_tags.iter().any(|tag| row.tags.contains(tag))
    {
        return false;
    }
    if let Some(phase) = &options.filter_phase {
        if row.phase.as_deref() != Some(phase.as_str()) {
            return false;
        }
    }
    if row.security_level > options.security_level {
        return false;
    }
    row.combined_score >= options.min_similarity
}

fn render_prompt(task: &str, base_prompt: &str, sources: &[RetrievedDocument]) -> String {
    let context = sources
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let body = match doc.summary.as_deref() {
                Some(summary) if !summary.is_empty() => summary.to_string(),
                _ => doc.content.chars().take(PROMPT_EXCERPT_CHARS).collect(),
            };
            format!(
                "\n### {}. {} (Relevance: {:.1}%)\n\n{}...\n\n",
                i + 1,
                doc.title,
                doc.score * 100.0,
                body
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\n## Relevant Knowledge Context\n\n{}\n\n## Task\n\n{}\n\n\
         **Instructions**: Please solve this task using the above knowledge context. \
         Reference specific knowledge items if applicable.",
        base_prompt, context, task
    )
    .trim()
    .to_string()
}

fn from_hybrid_row(row: HybridSearchRow) -> RetrievedDocument {
    RetrievedDocument {
        id: row.id,
        title: row.title,
        content: row.content,
        summary: row.summary,
        score: row.combined_score,
        knowledge_type: row.knowledge_type,
        tags: row.tags,
    }
}

fn from_text_row(row: TextSearchRow) -> RetrievedDocument {
    RetrievedDocument {
        id: row.id,
        title: row.title,
        content: row.content,
        summary: row.summary,
        score: UNRANKED_SCORE,
        knowledge_type: row.knowledge_type,
        tags: row.tags,
    }
}

/// Vector rows carry no type, tags or summary
fn from_vector_row(row: VectorSearchRow) -> RetrievedDocument {
    RetrievedDocument {
        id: row.id,
        title: row.title,
        content: row.content,
        summary: None,
        score: row.similarity,
        knowledge_type: KnowledgeType::Learning,
        tags: Vec::new(),
    }
}

fn from_item(item: KnowledgeItem) -> RetrievedDocument {
    RetrievedDocument {
        id: item.id,
        title: item.title,
        content: item.content,
        summary: item.summary,
        score: UNRANKED_SCORE,
        knowledge_type: item.knowledge_type,
        tags: item.tags,
    }
}
