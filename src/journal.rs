//! Development journal: knowledge capture
//!
//! Each entry is written to a dated markdown backup, embedded, summarized
//! and inserted into the knowledge store. Any failure after the backup
//! aborts the capture, so no half-written row is left behind.

use crate::embeddings::EmbeddingProvider;
use crate::error::{CirculateError, Result};
use crate::storage::{KnowledgeOrder, KnowledgeQuery, KnowledgeStore};
use crate::types::{
    AdrDecision, DevLogEntry, KnowledgeId, KnowledgeItem, KnowledgeType, NewKnowledge,
};
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Content shorter than this (in characters) is its own summary
const SUMMARY_MIN_CHARS: usize = 200;

const SUMMARY_INSTRUCTION: &str = "Summarize the following technical content in 2-3 sentences";

pub const DEFAULT_PHASE: &str = "Unknown";
pub const DEFAULT_COMPLEXITY: u8 = 5;
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Placeholder per-item cost (one embedding call)
const COST_PER_ITEM: f64 = 0.001;

const ADR_COMPLEXITY: u8 = 8;
const SOLUTION_COMPLEXITY: u8 = 6;
const SOLUTION_TITLE_CHARS: usize = 50;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Captures development knowledge into the store
pub struct DevJournalLogger {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    base_dir: PathBuf,
    author: String,
}

impl DevJournalLogger {
    /// `author` is recorded on entries that do not name their own
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        base_dir: impl Into<PathBuf>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            base_dir: base_dir.into(),
            author: author.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Capture one entry, returning the new item's id
    pub async fn log_development(&self, entry: &DevLogEntry) -> Result<KnowledgeId> {
        let backup_path = self.save_markdown(entry).await?;

        let embedding = self.embedder.embed(&entry.content).await?;
        let summary = self.generate_summary(&entry.content).await?;

        let row = NewKnowledge {
            title: entry.title.clone(),
            content: entry.content.clone(),
            summary: Some(summary),
            knowledge_type: entry.knowledge_type,
            embedding,
            phase: effective_phase(entry.phase.as_deref()).to_string(),
            tags: entry.tags.clone().unwrap_or_default(),
            author: entry.author.clone().unwrap_or_else(|| self.author.clone()),
            complexity: effective_complexity(entry.complexity),
            security_level: entry.security_level.unwrap_or_default(),
            related_commits: entry.related_commits.clone().unwrap_or_default(),
        };

        let id = self
            .store
            .insert_knowledge(&row)
            .await
            .map_err(|e| CirculateError::StoreWrite(e.to_string()))?;

        info!("Knowledge logged: {} ({})", entry.title, id);
        debug!("Markdown saved: {}", backup_path.display());
        Ok(id)
    }

    /// Capture an architecture decision record
    pub async fn log_adr(&self, decision: &AdrDecision) -> Result<KnowledgeId> {
        let mut entry = DevLogEntry::new(
            format!("ADR: {}", decision.title),
            adr_content(decision),
            KnowledgeType::Adr,
        );
        entry.tags = Some(vec![
            "architecture".to_string(),
            "decision-record".to_string(),
        ]);
        entry.complexity = Some(ADR_COMPLEXITY);

        self.log_development(&entry).await
    }

    /// Capture a problem/solution pair; tags default to `problem-solving`
    pub async fn log_solution(
        &self,
        problem: &str,
        solution: &str,
        tags: Option<Vec<String>>,
    ) -> Result<KnowledgeId> {
        let mut entry = DevLogEntry::new(
            solution_title(problem),
            format!("## Problem\n{}\n\n## Solution\n{}", problem, solution)
                .trim()
                .to_string(),
            KnowledgeType::Solution,
        );
        entry.tags = Some(tags.unwrap_or_else(|| vec!["problem-solving".to_string()]));
        entry.complexity = Some(SOLUTION_COMPLEXITY);

        self.log_development(&entry).await
    }

    /// Newest items first, archived included
    pub async fn query_recent(&self, limit: usize) -> Result<Vec<KnowledgeItem>> {
        let query = KnowledgeQuery::new()
            .order(KnowledgeOrder::NewestFirst)
            .limit(limit);
        self.store
            .select_knowledge(&query)
            .await
            .map_err(|e| CirculateError::Query(e.to_string()))
    }

    /// All items of `phase`, newest first
    pub async fn query_by_phase(&self, phase: &str) -> Result<Vec<KnowledgeItem>> {
        let query = KnowledgeQuery::new()
            .phase(phase)
            .order(KnowledgeOrder::NewestFirst);
        self.store
            .select_knowledge(&query)
            .await
            .map_err(|e| CirculateError::PhaseQuery(e.to_string()))
    }

    /// Approximate cost of a phase: a fixed amount per captured item
    pub async fn cost_by_phase(&self, phase: &str) -> Result<f64> {
        let items = self.query_by_phase(phase).await?;
        Ok(items.len() as f64 * COST_PER_ITEM)
    }

    async fn generate_summary(&self, content: &str) -> Result<String> {
        if content.chars().count() < SUMMARY_MIN_CHARS {
            return Ok(content.to_string());
        }
        self.embedder.summarize(content, SUMMARY_INSTRUCTION).await
    }

    async fn save_markdown(&self, entry: &DevLogEntry) -> Result<PathBuf> {
        let now = Utc::now();
        let dir = self.base_dir.join(now.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.md", slugify(&entry.title)));
        let markdown = render_markdown(entry, &now.to_rfc3339_opts(SecondsFormat::Millis, true));
        tokio::fs::write(&path, markdown).await?;

        Ok(path)
    }
}

/// Zero counts as unset
fn effective_complexity(complexity: Option<u8>) -> u8 {
    complexity
        .filter(|c| *c != 0)
        .unwrap_or(DEFAULT_COMPLEXITY)
}

/// Empty counts as unset
fn effective_phase(phase: Option<&str>) -> &str {
    phase.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PHASE)
}

/// Lowercased title with whitespace runs and path separators as hyphens
fn slugify(title: &str) -> String {
    WHITESPACE_RE
        .replace_all(&title.to_lowercase(), "-")
        .replace(['/', '\\'], "-")
}

fn render_markdown(entry: &DevLogEntry, timestamp: &str) -> String {
    let tags = match entry.tags.as_deref() {
        Some(tags) if !tags.is_empty() => tags.join(", "),
        _ => "None".to_string(),
    };
    let complexity = match entry.complexity {
        Some(c) if c != 0 => c.to_string(),
        _ => "N/A".to_string(),
    };
    let commits = match entry.related_commits.as_deref() {
        Some(commits) if !commits.is_empty() => commits.join(", "),
        _ => "None".to_string(),
    };

    format!(
        "# {title}\n\n\
         **Type**: {kind}\n\
         **Phase**: {phase}\n\
         **Date**: {timestamp}\n\
         **Tags**: {tags}\n\
         **Complexity**: {complexity}/10\n\n\
         ---\n\n\
         {content}\n\n\
         ---\n\n\
         **Related Commits**: {commits}\n",
        title = entry.title,
        kind = entry.knowledge_type,
        phase = effective_phase(entry.phase.as_deref()),
        timestamp = timestamp,
        tags = tags,
        complexity = complexity,
        content = entry.content,
        commits = commits,
    )
}

fn adr_content(decision: &AdrDecision) -> String {
    let mut content = format!(
        "## Context\n{}\n\n## Decision\n{}\n\n## Consequences\n{}",
        decision.context, decision.decision, decision.consequences
    );
    if let Some(alternatives) = decision.alternatives.as_deref().filter(|a| !a.is_empty()) {
        content.push_str(&format!("\n\n## Alternatives Considered\n{}", alternatives));
    }
    content.trim().to_string()
}

/// Title stored for a problem/solution pair
pub fn solution_title(problem: &str) -> String {
    let head: String = problem.chars().take(SOLUTION_TITLE_CHARS).collect();
    format!("Solution: {}...", head)
}
