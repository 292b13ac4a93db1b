//! SQLite knowledge store
//!
//! rusqlite behind a deadpool-sqlite pool. Knowledge rows keep tags and
//! commit lists as JSON text and embeddings as little-endian f32 blobs; an
//! FTS5 mirror table (maintained by triggers) serves full-text search.
//! Vector and hybrid scoring run in process over the active rows.

use crate::embeddings::cosine_similarity;
use crate::error::{CirculateError, Result};
use crate::storage::{
    HybridSearchRow, KnowledgeOrder, KnowledgePatch, KnowledgeQuery, KnowledgeStore,
    TextSearchRow, VectorSearchRow,
};
use crate::types::{
    AgentExecution, ArchiveCounts, FailureRecord, KnowledgeId, KnowledgeItem, KnowledgeType,
    NewKnowledge, SecurityLevel, TaskFailure,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Weight of the lexical signal in the hybrid score; the rest is cosine
const LEXICAL_WEIGHT: f64 = 0.3;

/// Archived items older than this have their content replaced by the summary
const COMPRESS_AFTER_DAYS: f64 = 30.0;

/// Ratings below this make a stale item eligible for archival
const ARCHIVE_RATING_FLOOR: f64 = 2.0;

const BUSY_TIMEOUT_SECS: u64 = 5;

static TERM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid term regex"));

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_base (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    type TEXT NOT NULL CHECK(type IN (
        'dev_log', 'adr', 'solution', 'learning', 'prompt_template'
    )),
    embedding BLOB,
    phase TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    author TEXT,
    complexity INTEGER NOT NULL DEFAULT 5,
    security_level TEXT NOT NULL DEFAULT 'public' CHECK(security_level IN (
        'public', 'internal', 'confidential', 'restricted'
    )),
    related_commits TEXT NOT NULL DEFAULT '[]',
    usage_count INTEGER NOT NULL DEFAULT 0,
    avg_rating REAL NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    failure_rate REAL NOT NULL DEFAULT 0,
    last_used_at TEXT,
    is_archived INTEGER NOT NULL DEFAULT 0,
    archived_at TEXT,
    retention_days INTEGER NOT NULL DEFAULT 90
);

CREATE INDEX IF NOT EXISTS idx_knowledge_phase ON knowledge_base(phase);
CREATE INDEX IF NOT EXISTS idx_knowledge_created ON knowledge_base(created_at DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    title, content, summary,
    content='knowledge_base', content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS knowledge_fts_insert AFTER INSERT ON knowledge_base BEGIN
    INSERT INTO knowledge_fts(rowid, title, content, summary)
    VALUES (new.rowid, new.title, new.content, new.summary);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_delete AFTER DELETE ON knowledge_base BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, title, content, summary)
    VALUES ('delete', old.rowid, old.title, old.content, old.summary);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_update
AFTER UPDATE OF title, content, summary ON knowledge_base BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, title, content, summary)
    VALUES ('delete', old.rowid, old.title, old.content, old.summary);
    INSERT INTO knowledge_fts(rowid, title, content, summary)
    VALUES (new.rowid, new.title, new.content, new.summary);
END;

CREATE TABLE IF NOT EXISTS task_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    description TEXT NOT NULL,
    error_message TEXT NOT NULL,
    attempted_knowledge TEXT NOT NULL DEFAULT '[]',
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failures_timestamp ON task_failures(timestamp DESC);

CREATE TABLE IF NOT EXISTS agent_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name TEXT NOT NULL,
    task_description TEXT NOT NULL,
    phase TEXT,
    status TEXT NOT NULL CHECK (status IN ('success', 'failed')),
    quality_score REAL NOT NULL DEFAULT 0,
    execution_time_ms INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_executions_created ON agent_executions(created_at);
"#;

const ITEM_COLUMNS: &str = "id, created_at, updated_at, title, content, summary, type, \
     embedding, phase, tags, author, complexity, security_level, related_commits, \
     usage_count, avg_rating, failure_count, failure_rate, last_used_at, is_archived, \
     archived_at, retention_days";

/// SQLite-backed [`KnowledgeStore`]
pub struct SqliteKnowledgeStore {
    pool: Pool,
}

impl SqliteKnowledgeStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("Opening knowledge store at: {}", path_str);

        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = Config::new(path_str).create_pool(Runtime::Tokio1).map_err(|e| {
            CirculateError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store
            .interact(|conn| {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        debug!("Knowledge store schema ready");
        Ok(store)
    }

    /// Run `f` on a pooled connection
    async fn interact<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            CirculateError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| {
            conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
            f(conn)
        })
        .await
        .map_err(|e| CirculateError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_timestamp(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CirculateError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn id_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<KnowledgeId> {
    let raw: String = row.get(idx)?;
    KnowledgeId::from_string(&raw).map_err(|e| conversion_error(idx, e))
}

fn embedding_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<f32>>> {
    let raw: Option<Vec<u8>> = row.get(idx)?;
    Ok(raw.and_then(|bytes| deserialize_embedding(&bytes)))
}

/// Map a row selected with [`ITEM_COLUMNS`]
fn read_item(row: &Row<'_>) -> rusqlite::Result<KnowledgeItem> {
    Ok(KnowledgeItem {
        id: id_at(row, 0)?,
        created_at: timestamp_at(row, 1)?,
        updated_at: timestamp_at(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        knowledge_type: parsed_at::<KnowledgeType>(row, 6)?,
        embedding: embedding_at(row, 7)?,
        phase: row.get(8)?,
        tags: json_at(row, 9)?,
        author: row.get(10)?,
        complexity: row.get(11)?,
        security_level: parsed_at::<SecurityLevel>(row, 12)?,
        related_commits: json_at(row, 13)?,
        usage_count: row.get(14)?,
        avg_rating: row.get(15)?,
        failure_count: row.get(16)?,
        failure_rate: row.get(17)?,
        last_used_at: opt_timestamp_at(row, 18)?,
        is_archived: row.get(19)?,
        archived_at: opt_timestamp_at(row, 20)?,
        retention_days: row.get(21)?,
    })
}

fn fetch_item(conn: &Connection, id: &str) -> Result<Option<KnowledgeItem>> {
    let sql = format!("SELECT {} FROM knowledge_base WHERE id = ?1", ITEM_COLUMNS);
    Ok(conn.query_row(&sql, params![id], read_item).optional()?)
}

/// Lowercased distinct word terms
fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TERM_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Share of `terms` that occur as words in `haystack`
fn lexical_score(terms: &[String], haystack: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let words: HashSet<String> = TERM_RE
        .find_iter(&haystack.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect();
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

/// FTS5 expression matching any of the query terms
fn fts_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn order_clause(order: KnowledgeOrder) -> &'static str {
    match order {
        KnowledgeOrder::NewestFirst => "created_at DESC",
        KnowledgeOrder::OldestFirst => "created_at ASC",
        KnowledgeOrder::MostUsed => "usage_count DESC, created_at DESC",
        KnowledgeOrder::HighestRated => "avg_rating DESC, created_at DESC",
        KnowledgeOrder::HighestFailureRate => "failure_rate DESC, created_at DESC",
    }
}

fn build_select(query: &KnowledgeQuery) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(phase) = &query.phase {
        values.push(Value::Text(phase.clone()));
        clauses.push(format!("phase = ?{}", values.len()));
    }
    if let Some(kind) = query.knowledge_type {
        values.push(Value::Text(kind.as_str().to_string()));
        clauses.push(format!("type = ?{}", values.len()));
    }
    if let Some(archived) = query.archived {
        values.push(Value::Integer(i64::from(archived)));
        clauses.push(format!("is_archived = ?{}", values.len()));
    }
    for tag in &query.tags_all {
        values.push(Value::Text(tag.clone()));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(knowledge_base.tags) WHERE value = ?{})",
            values.len()
        ));
    }
    if let Some(min) = query.min_usage_count {
        values.push(Value::Integer(i64::from(min)));
        clauses.push(format!("usage_count >= ?{}", values.len()));
    }
    if let Some(min) = query.min_failure_rate {
        values.push(Value::Real(min));
        clauses.push(format!("failure_rate >= ?{}", values.len()));
    }

    let mut sql = format!("SELECT {} FROM knowledge_base", ITEM_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order_clause(query.order));
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    (sql, values)
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn insert_knowledge(&self, item: &NewKnowledge) -> Result<KnowledgeId> {
        let id = KnowledgeId::new();
        let now = format_timestamp(&Utc::now());
        let tags = serde_json::to_string(&item.tags)?;
        let commits = serde_json::to_string(&item.related_commits)?;
        let embedding = serialize_embedding(&item.embedding);
        let item = item.clone();
        let id_str = id.to_string();

        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO knowledge_base (
                    id, created_at, updated_at, title, content, summary, type, embedding,
                    phase, tags, author, complexity, security_level, related_commits
                ) VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id_str,
                    now,
                    item.title,
                    item.content,
                    item.summary,
                    item.knowledge_type.as_str(),
                    embedding,
                    item.phase,
                    tags,
                    item.author,
                    item.complexity,
                    item.security_level.as_str(),
                    commits,
                ],
            )?;
            Ok(())
        })
        .await?;

        debug!("Inserted knowledge {}", id);
        Ok(id)
    }

    async fn get_knowledge(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        let id = id.to_string();
        self.interact(move |conn| fetch_item(conn, &id)).await
    }

    async fn select_knowledge(&self, query: &KnowledgeQuery) -> Result<Vec<KnowledgeItem>> {
        let (sql, values) = build_select(query);
        self.interact(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), read_item)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn update_knowledge(&self, id: KnowledgeId, patch: &KnowledgePatch) -> Result<bool> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(rating) = patch.avg_rating {
            values.push(Value::Real(rating));
            sets.push(format!("avg_rating = ?{}", values.len()));
        }
        if let Some(tags) = &patch.tags {
            values.push(Value::Text(serde_json::to_string(tags)?));
            sets.push(format!("tags = ?{}", values.len()));
        }
        if let Some(archived) = patch.is_archived {
            values.push(Value::Integer(i64::from(archived)));
            sets.push(format!("is_archived = ?{}", values.len()));
        }
        if let Some(at) = &patch.archived_at {
            values.push(Value::Text(format_timestamp(at)));
            sets.push(format!("archived_at = ?{}", values.len()));
        }

        values.push(Value::Text(format_timestamp(&Utc::now())));
        sets.push(format!("updated_at = ?{}", values.len()));
        values.push(Value::Text(id.to_string()));
        let sql = format!(
            "UPDATE knowledge_base SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );

        let changed = self
            .interact(move |conn| Ok(conn.execute(&sql, params_from_iter(values))?))
            .await?;
        Ok(changed > 0)
    }

    async fn record_usage(
        &self,
        id: KnowledgeId,
        rating: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<KnowledgeItem>> {
        let id = id.to_string();
        let at = format_timestamp(&at);
        self.interact(move |conn| {
            let changed = conn.execute(
                "UPDATE knowledge_base SET
                    avg_rating = (avg_rating * usage_count + ?2) / (usage_count + 1),
                    usage_count = usage_count + 1,
                    last_used_at = ?3,
                    updated_at = ?3
                 WHERE id = ?1",
                params![id, rating, at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            fetch_item(conn, &id)
        })
        .await
    }

    async fn record_failure_hit(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        let id = id.to_string();
        let now = format_timestamp(&Utc::now());
        self.interact(move |conn| {
            let changed = conn.execute(
                "UPDATE knowledge_base SET
                    failure_count = failure_count + 1,
                    failure_rate = CAST(failure_count + 1 AS REAL) / max(usage_count, 1),
                    updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            fetch_item(conn, &id)
        })
        .await
    }

    async fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<TextSearchRow>> {
        let Some(expression) = fts_expression(query) else {
            return Ok(Vec::new());
        };

        self.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT k.id, k.title, k.content, k.summary, k.type, k.tags
                 FROM knowledge_fts
                 JOIN knowledge_base k ON k.rowid = knowledge_fts.rowid
                 WHERE knowledge_fts MATCH ?1 AND k.is_archived = 0
                 ORDER BY knowledge_fts.rank
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![expression, limit as i64], |row| {
                Ok(TextSearchRow {
                    id: id_at(row, 0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    summary: row.get(3)?,
                    knowledge_type: parsed_at::<KnowledgeType>(row, 4)?,
                    tags: json_at(row, 5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorSearchRow>> {
        let query = embedding.to_vec();
        self.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, embedding FROM knowledge_base
                 WHERE is_archived = 0 AND embedding IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    id_at(row, 0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    embedding_at(row, 3)?,
                ))
            })?;

            let mut matches = Vec::new();
            for row in rows {
                let (id, title, content, stored) = row?;
                let Some(stored) = stored else { continue };
                let similarity = f64::from(cosine_similarity(&query, &stored));
                if similarity >= threshold {
                    matches.push(VectorSearchRow {
                        id,
                        title,
                        content,
                        similarity,
                    });
                }
            }

            matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            matches.truncate(limit);
            Ok(matches)
        })
        .await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<HybridSearchRow>> {
        let terms = query_terms(query);
        let query_embedding = embedding.to_vec();
        self.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, summary, type, tags, phase, security_level, embedding
                 FROM knowledge_base WHERE is_archived = 0",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    HybridSearchRow {
                        id: id_at(row, 0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        summary: row.get(3)?,
                        knowledge_type: parsed_at::<KnowledgeType>(row, 4)?,
                        tags: json_at(row, 5)?,
                        phase: row.get(6)?,
                        security_level: parsed_at::<SecurityLevel>(row, 7)?,
                        combined_score: 0.0,
                    },
                    embedding_at(row, 8)?,
                ))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (mut doc, stored) = row?;
                let haystack = format!(
                    "{} {} {}",
                    doc.title,
                    doc.content,
                    doc.summary.as_deref().unwrap_or_default()
                );
                let lexical = lexical_score(&terms, &haystack);
                let semantic = stored
                    .map(|s| f64::from(cosine_similarity(&query_embedding, &s)).max(0.0))
                    .unwrap_or(0.0);
                doc.combined_score = LEXICAL_WEIGHT * lexical + (1.0 - LEXICAL_WEIGHT) * semantic;
                if doc.combined_score > 0.0 {
                    scored.push(doc);
                }
            }

            scored.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
            scored.truncate(limit);
            Ok(scored)
        })
        .await
    }

    async fn archive_old_knowledge(&self) -> Result<ArchiveCounts> {
        let now = format_timestamp(&Utc::now());
        self.interact(move |conn| {
            let tx = conn.transaction()?;
            let archived = tx.execute(
                "UPDATE knowledge_base SET is_archived = 1, archived_at = ?1, updated_at = ?1
                 WHERE is_archived = 0 AND (
                    (usage_count = 0
                        AND julianday(?1) - julianday(created_at) > retention_days)
                    OR (usage_count > 0 AND avg_rating < ?2
                        AND julianday(?1) - julianday(COALESCE(last_used_at, created_at))
                            > retention_days)
                 )",
                params![now, ARCHIVE_RATING_FLOOR],
            )?;
            let compressed = tx.execute(
                "UPDATE knowledge_base SET content = summary, updated_at = ?1
                 WHERE is_archived = 1 AND summary IS NOT NULL AND content <> summary
                   AND julianday(?1) - julianday(archived_at) > ?2",
                params![now, COMPRESS_AFTER_DAYS],
            )?;
            tx.commit()?;
            Ok(ArchiveCounts {
                archived,
                compressed,
            })
        })
        .await
    }

    async fn insert_failure(&self, failure: &TaskFailure) -> Result<()> {
        let attempted: Vec<String> = failure
            .attempted_knowledge
            .iter()
            .map(|id| id.to_string())
            .collect();
        let attempted = serde_json::to_string(&attempted)?;
        let failure = failure.clone();
        let timestamp = format_timestamp(&failure.timestamp);

        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO task_failures
                    (task_id, description, error_message, attempted_knowledge, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    failure.task_id,
                    failure.description,
                    failure.error_message,
                    attempted,
                    timestamp
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn select_failures(&self, since: DateTime<Utc>) -> Result<Vec<FailureRecord>> {
        let since = format_timestamp(&since);
        self.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, description, error_message, attempted_knowledge, timestamp
                 FROM task_failures WHERE timestamp >= ?1 ORDER BY timestamp DESC",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                let attempted: Vec<String> = json_at(row, 4)?;
                let attempted_knowledge = attempted
                    .iter()
                    .map(|raw| KnowledgeId::from_string(raw).map_err(|e| conversion_error(4, e)))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(FailureRecord {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    description: row.get(2)?,
                    error_message: row.get(3)?,
                    attempted_knowledge,
                    timestamp: timestamp_at(row, 5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn record_execution(&self, execution: &AgentExecution) -> Result<()> {
        let execution = execution.clone();
        let created_at = format_timestamp(&execution.created_at);
        let time_ms = i64::try_from(execution.execution_time_ms).unwrap_or(i64::MAX);

        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO agent_executions
                    (agent_name, task_description, phase, status, quality_score,
                     execution_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    execution.agent_name,
                    execution.task_description,
                    execution.phase,
                    execution.status.as_str(),
                    execution.quality_score,
                    time_ms,
                    created_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn select_executions(&self, since: DateTime<Utc>) -> Result<Vec<AgentExecution>> {
        let since = format_timestamp(&since);
        self.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT agent_name, task_description, phase, status, quality_score,
                        execution_time_ms, created_at
                 FROM agent_executions WHERE created_at >= ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                let time_ms: i64 = row.get(5)?;
                Ok(AgentExecution {
                    agent_name: row.get(0)?,
                    task_description: row.get(1)?,
                    phase: row.get(2)?,
                    status: parsed_at(row, 3)?,
                    quality_score: row.get(4)?,
                    execution_time_ms: u64::try_from(time_ms).unwrap_or(0),
                    created_at: timestamp_at(row, 6)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteKnowledgeStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteKnowledgeStore::open(dir.path().join("knowledge.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn sample(title: &str, content: &str, tags: &[&str], embedding: Vec<f32>) -> NewKnowledge {
        NewKnowledge {
            title: title.to_string(),
            content: content.to_string(),
            summary: Some(content.to_string()),
            knowledge_type: KnowledgeType::Solution,
            embedding,
            phase: "Phase 1".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            author: "tester".to_string(),
            complexity: 5,
            security_level: SecurityLevel::Public,
            related_commits: vec![],
        }
    }

    async fn backdate(store: &SqliteKnowledgeStore, id: KnowledgeId, days: i64) {
        let created = format_timestamp(&(Utc::now() - ChronoDuration::days(days)));
        let id = id.to_string();
        store
            .interact(move |conn| {
                conn.execute(
                    "UPDATE knowledge_base SET created_at = ?1 WHERE id = ?2",
                    params![created, id],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_get_defaults() {
        let (store, _dir) = create_test_store().await;
        let id = store
            .insert_knowledge(&sample("JWT", "Use RS256", &["auth"], vec![1.0, 0.0]))
            .await
            .unwrap();

        let item = store.get_knowledge(id).await.unwrap().unwrap();
        assert_eq!(item.title, "JWT");
        assert_eq!(item.usage_count, 0);
        assert_eq!(item.avg_rating, 0.0);
        assert_eq!(item.failure_count, 0);
        assert!(!item.is_archived);
        assert_eq!(item.retention_days, 90);
        assert_eq!(item.embedding, Some(vec![1.0, 0.0]));

        assert!(store.get_knowledge(KnowledgeId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_usage_running_mean() {
        let (store, _dir) = create_test_store().await;
        let id = store
            .insert_knowledge(&sample("a", "b", &[], vec![1.0]))
            .await
            .unwrap();

        for rating in [6.0, 8.0, 10.0] {
            store.record_usage(id, rating, Utc::now()).await.unwrap();
        }

        let item = store.get_knowledge(id).await.unwrap().unwrap();
        assert_eq!(item.usage_count, 3);
        assert!((item.avg_rating - 8.0).abs() < 1e-9);
        assert!(item.last_used_at.is_some());

        let missing = store
            .record_usage(KnowledgeId::new(), 5.0, Utc::now())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_record_failure_hit_uses_usage_floor() {
        let (store, _dir) = create_test_store().await;
        let id = store
            .insert_knowledge(&sample("a", "b", &[], vec![1.0]))
            .await
            .unwrap();

        let item = store.record_failure_hit(id).await.unwrap().unwrap();
        assert_eq!(item.failure_count, 1);
        assert!((item.failure_rate - 1.0).abs() < 1e-9);

        for _ in 0..4 {
            store.record_usage(id, 7.0, Utc::now()).await.unwrap();
        }
        let item = store.record_failure_hit(id).await.unwrap().unwrap();
        assert_eq!(item.failure_count, 2);
        assert!((item.failure_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_select_requires_all_tags() {
        let (store, _dir) = create_test_store().await;
        store
            .insert_knowledge(&sample("both", "x", &["rust", "async"], vec![1.0]))
            .await
            .unwrap();
        store
            .insert_knowledge(&sample("one", "y", &["rust"], vec![1.0]))
            .await
            .unwrap();

        let tags = vec!["rust".to_string(), "async".to_string()];
        let items = store
            .select_knowledge(&KnowledgeQuery::new().tags_all(&tags).active())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "both");
    }

    #[tokio::test]
    async fn test_update_patch_and_missing_id() {
        let (store, _dir) = create_test_store().await;
        let id = store
            .insert_knowledge(&sample("a", "b", &["x"], vec![1.0]))
            .await
            .unwrap();

        let patch = KnowledgePatch {
            tags: Some(vec!["x".to_string(), "needs-improvement".to_string()]),
            ..Default::default()
        };
        assert!(store.update_knowledge(id, &patch).await.unwrap());
        assert!(!store
            .update_knowledge(KnowledgeId::new(), &patch)
            .await
            .unwrap());

        let item = store.get_knowledge(id).await.unwrap().unwrap();
        assert_eq!(item.tags, vec!["x", "needs-improvement"]);
    }

    #[tokio::test]
    async fn test_full_text_search_skips_archived() {
        let (store, _dir) = create_test_store().await;
        let live = store
            .insert_knowledge(&sample("Tokio runtime", "spawn blocking work", &[], vec![1.0]))
            .await
            .unwrap();
        let gone = store
            .insert_knowledge(&sample("Tokio legacy", "old runtime notes", &[], vec![1.0]))
            .await
            .unwrap();
        store
            .update_knowledge(
                gone,
                &KnowledgePatch {
                    is_archived: Some(true),
                    archived_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rows = store.full_text_search("tokio", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, live);

        assert!(store.full_text_search("  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_search_orders_by_combined_score() {
        let (store, _dir) = create_test_store().await;
        let close = store
            .insert_knowledge(&sample("cache design", "lru cache", &[], vec![1.0, 0.0]))
            .await
            .unwrap();
        let far = store
            .insert_knowledge(&sample("unrelated", "graph layout", &[], vec![0.0, 1.0]))
            .await
            .unwrap();

        let rows = store
            .hybrid_search("cache", &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(rows[0].id, close);
        assert!((rows[0].combined_score - 1.0).abs() < 1e-6);
        assert!(rows.iter().all(|r| r.id != far));
    }

    #[tokio::test]
    async fn test_vector_search_threshold() {
        let (store, _dir) = create_test_store().await;
        store
            .insert_knowledge(&sample("a", "a", &[], vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .insert_knowledge(&sample("b", "b", &[], vec![0.6, 0.8]))
            .await
            .unwrap();

        let rows = store.vector_search(&[1.0, 0.0], 0.7, 5).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "a");
    }

    #[tokio::test]
    async fn test_archive_old_unused_knowledge() {
        let (store, _dir) = create_test_store().await;
        let stale = store
            .insert_knowledge(&sample("stale", "old", &[], vec![1.0]))
            .await
            .unwrap();
        let used = store
            .insert_knowledge(&sample("used", "old but useful", &[], vec![1.0]))
            .await
            .unwrap();
        let fresh = store
            .insert_knowledge(&sample("fresh", "new", &[], vec![1.0]))
            .await
            .unwrap();
        backdate(&store, stale, 120).await;
        backdate(&store, used, 120).await;
        store.record_usage(used, 9.0, Utc::now()).await.unwrap();

        let counts = store.archive_old_knowledge().await.unwrap();
        assert_eq!(counts.archived, 1);
        assert_eq!(counts.compressed, 0);

        assert!(store.get_knowledge(stale).await.unwrap().unwrap().is_archived);
        assert!(!store.get_knowledge(used).await.unwrap().unwrap().is_archived);
        assert!(!store.get_knowledge(fresh).await.unwrap().unwrap().is_archived);
    }

    #[tokio::test]
    async fn test_failures_windowed_newest_first() {
        let (store, _dir) = create_test_store().await;
        let now = Utc::now();
        for (task, age) in [("old", 30), ("recent", 1), ("newest", 0)] {
            store
                .insert_failure(&TaskFailure {
                    task_id: task.to_string(),
                    description: "d".to_string(),
                    error_message: "timeout".to_string(),
                    attempted_knowledge: vec![KnowledgeId::new()],
                    timestamp: now - ChronoDuration::days(age),
                })
                .await
                .unwrap();
        }

        let rows = store
            .select_failures(now - ChronoDuration::days(7))
            .await
            .unwrap();
        let tasks: Vec<_> = rows.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(tasks, vec!["newest", "recent"]);
        assert_eq!(rows[0].attempted_knowledge.len(), 1);
    }

    #[tokio::test]
    async fn test_executions_windowed_oldest_first() {
        let (store, _dir) = create_test_store().await;
        let now = Utc::now();
        for (task, age, status) in [
            ("stale", 30, ExecutionStatus::Success),
            ("yesterday", 1, ExecutionStatus::Failed),
            ("today", 0, ExecutionStatus::Success),
        ] {
            store
                .record_execution(&AgentExecution {
                    agent_name: "coder".to_string(),
                    task_description: task.to_string(),
                    phase: Some("Phase 2".to_string()),
                    status,
                    quality_score: 7.5,
                    execution_time_ms: 1_200,
                    created_at: now - ChronoDuration::days(age),
                })
                .await
                .unwrap();
        }

        let rows = store
            .select_executions(now - ChronoDuration::days(7))
            .await
            .unwrap();
        let tasks: Vec<_> = rows.iter().map(|r| r.task_description.as_str()).collect();
        assert_eq!(tasks, vec!["yesterday", "today"]);
        assert_eq!(rows[0].status, ExecutionStatus::Failed);
        assert_eq!(rows[1].phase.as_deref(), Some("Phase 2"));
        assert_eq!(rows[1].execution_time_ms, 1_200);
        assert!((rows[1].quality_score - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_lexical_score() {
        let terms = query_terms("Cache cache eviction");
        assert_eq!(terms, vec!["cache", "eviction"]);
        assert!((lexical_score(&terms, "An LRU cache") - 0.5).abs() < 1e-9);
        assert_eq!(lexical_score(&[], "anything"), 0.0);
    }
}
