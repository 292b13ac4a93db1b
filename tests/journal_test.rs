//! Knowledge capture through the journal

mod common;

use chrono::Utc;
use circulate_core::error::CirculateError;
use circulate_core::{AdrDecision, DevJournalLogger, DevLogEntry, KnowledgeType, SecurityLevel};
use common::{knowledge_item, MemoryStore, ScriptedEmbedder};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn logger(store: Arc<MemoryStore>, embedder: Arc<ScriptedEmbedder>) -> (TempDir, DevJournalLogger) {
    let dir = TempDir::new().unwrap();
    let journal = DevJournalLogger::new(store, embedder, dir.path(), "tester");
    (dir, journal)
}

#[tokio::test]
async fn test_short_content_is_never_summarized() {
    let store = MemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    let (_dir, journal) = logger(store.clone(), embedder.clone());

    let id = journal
        .log_development(&DevLogEntry::new(
            "Short note",
            "Fixed the flaky test.",
            KnowledgeType::DevLog,
        ))
        .await
        .unwrap();

    assert_eq!(embedder.summarize_count(), 0);
    assert_eq!(embedder.embed_count(), 1);
    let item = store.item(id).unwrap();
    assert_eq!(item.summary.as_deref(), Some("Fixed the flaky test."));
}

#[tokio::test]
async fn test_long_content_is_summarized() {
    let store = MemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    let (_dir, journal) = logger(store.clone(), embedder.clone());

    let content = "Connection pooling details. ".repeat(10);
    let id = journal
        .log_development(&DevLogEntry::new("Long note", content, KnowledgeType::DevLog))
        .await
        .unwrap();

    assert_eq!(embedder.summarize_count(), 1);
    assert_eq!(
        store.item(id).unwrap().summary.as_deref(),
        Some("A scripted summary.")
    );
}

#[tokio::test]
async fn test_defaults_applied_to_sparse_entry() {
    let store = MemoryStore::new();
    let (_dir, journal) = logger(store.clone(), ScriptedEmbedder::new());

    let mut entry = DevLogEntry::new("Sparse", "body", KnowledgeType::Learning);
    entry.complexity = Some(0);
    let id = journal.log_development(&entry).await.unwrap();

    let item = store.item(id).unwrap();
    assert_eq!(item.phase.as_deref(), Some("Unknown"));
    assert_eq!(item.complexity, 5);
    assert_eq!(item.security_level, SecurityLevel::Public);
    assert_eq!(item.author.as_deref(), Some("tester"));
    assert!(item.tags.is_empty());
    assert!(item.related_commits.is_empty());
}

#[tokio::test]
async fn test_empty_phase_is_stored_as_unknown() {
    let store = MemoryStore::new();
    let (_dir, journal) = logger(store.clone(), ScriptedEmbedder::new());

    let mut entry = DevLogEntry::new("Blank phase", "body", KnowledgeType::DevLog);
    entry.phase = Some(String::new());
    let id = journal.log_development(&entry).await.unwrap();

    assert_eq!(store.item(id).unwrap().phase.as_deref(), Some("Unknown"));
}

#[tokio::test]
async fn test_backup_write_failure_leaves_nothing_behind() {
    let store = MemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    // A directory cannot be created beneath a regular file
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let journal = DevJournalLogger::new(
        store.clone(),
        embedder.clone(),
        blocker.path().join("sub"),
        "tester",
    );

    let result = journal
        .log_development(&DevLogEntry::new("Unwritable", "body", KnowledgeType::DevLog))
        .await;

    assert!(matches!(result, Err(CirculateError::Io(_))));
    assert_eq!(store.len(), 0);
    assert_eq!(embedder.embed_count(), 0);
}

#[tokio::test]
async fn test_markdown_backup_is_written_under_dated_directory() {
    let store = MemoryStore::new();
    let (dir, journal) = logger(store, ScriptedEmbedder::new());

    let mut entry = DevLogEntry::new("Auth  Flow/Design", "Use PKCE.", KnowledgeType::DevLog);
    entry.tags = Some(vec!["auth".to_string(), "oauth".to_string()]);
    entry.phase = Some("Phase 2".to_string());
    journal.log_development(&entry).await.unwrap();

    let day = Utc::now().format("%Y-%m-%d").to_string();
    let path = dir.path().join(day).join("auth-flow-design.md");
    let markdown = std::fs::read_to_string(path).unwrap();
    assert!(markdown.contains("# Auth  Flow/Design"));
    assert!(markdown.contains("Use PKCE."));
    assert!(markdown.contains("auth, oauth"));
    assert!(markdown.contains("Phase 2"));
}

#[tokio::test]
async fn test_store_failure_surfaces_as_store_write() {
    let store = MemoryStore::new();
    store.fail_writes.store(true, Ordering::SeqCst);
    let (_dir, journal) = logger(store, ScriptedEmbedder::new());

    let result = journal
        .log_development(&DevLogEntry::new("t", "c", KnowledgeType::DevLog))
        .await;
    assert!(matches!(result, Err(CirculateError::StoreWrite(_))));
}

#[tokio::test]
async fn test_embedding_failure_aborts_before_insert() {
    let store = MemoryStore::new();
    let (_dir, journal) = logger(store.clone(), ScriptedEmbedder::failing());

    let result = journal
        .log_development(&DevLogEntry::new("t", "c", KnowledgeType::DevLog))
        .await;
    assert!(matches!(result, Err(CirculateError::Embedding(_))));
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_log_adr_shapes_entry() {
    let store = MemoryStore::new();
    let (_dir, journal) = logger(store.clone(), ScriptedEmbedder::new());

    let id = journal
        .log_adr(&AdrDecision {
            title: "Use SQLite".to_string(),
            context: "Single-node deployment".to_string(),
            decision: "Embed SQLite with WAL".to_string(),
            consequences: "No horizontal scaling".to_string(),
            alternatives: Some("Postgres".to_string()),
        })
        .await
        .unwrap();

    let item = store.item(id).unwrap();
    assert_eq!(item.title, "ADR: Use SQLite");
    assert_eq!(item.knowledge_type, KnowledgeType::Adr);
    assert_eq!(item.complexity, 8);
    assert_eq!(
        item.tags,
        vec!["architecture".to_string(), "decision-record".to_string()]
    );
    assert!(item.content.contains("Embed SQLite with WAL"));
    assert!(item.content.contains("Postgres"));
}

#[tokio::test]
async fn test_log_solution_truncates_long_titles() {
    let store = MemoryStore::new();
    let (_dir, journal) = logger(store.clone(), ScriptedEmbedder::new());

    let problem = "x".repeat(60);
    let id = journal.log_solution(&problem, "fixed", None).await.unwrap();

    let item = store.item(id).unwrap();
    assert_eq!(item.title, format!("Solution: {}...", "x".repeat(50)));
    assert_eq!(item.knowledge_type, KnowledgeType::Solution);
    assert_eq!(item.complexity, 6);
    assert_eq!(item.tags, vec!["problem-solving".to_string()]);
    assert!(item.content.starts_with("## Problem\n"));
}

#[tokio::test]
async fn test_cost_by_phase_is_a_tenth_of_a_cent_per_item() {
    let store = MemoryStore::new();
    for i in 0..3 {
        store.seed(knowledge_item(&format!("k{}", i), 5.0, 0, 0.0, i));
    }
    let mut other = knowledge_item("other", 5.0, 0, 0.0, 0);
    other.phase = Some("Phase 9".to_string());
    store.seed(other);
    let (_dir, journal) = logger(store, ScriptedEmbedder::new());

    assert_eq!(journal.cost_by_phase("Phase 1").await.unwrap(), 0.003);
    assert_eq!(journal.cost_by_phase("Phase 404").await.unwrap(), 0.0);
}

#[tokio::test]
async fn test_query_errors_carry_their_kind() {
    let store = MemoryStore::new();
    store.fail_reads.store(true, Ordering::SeqCst);
    let (_dir, journal) = logger(store, ScriptedEmbedder::new());

    assert!(matches!(
        journal.query_recent(10).await,
        Err(CirculateError::Query(_))
    ));
    assert!(matches!(
        journal.query_by_phase("Phase 1").await,
        Err(CirculateError::PhaseQuery(_))
    ));
}

#[tokio::test]
async fn test_query_recent_is_newest_first_and_includes_archived() {
    let store = MemoryStore::new();
    store.seed(knowledge_item("old", 5.0, 0, 0.0, 10));
    let mut archived = knowledge_item("archived", 5.0, 0, 0.0, 5);
    archived.is_archived = true;
    store.seed(archived);
    store.seed(knowledge_item("new", 5.0, 0, 0.0, 0));
    let (_dir, journal) = logger(store, ScriptedEmbedder::new());

    let titles: Vec<String> = journal
        .query_recent(2)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.title)
        .collect();
    assert_eq!(titles, vec!["new".to_string(), "archived".to_string()]);
}
