//! Circulate - knowledge circulation for coding agents
//!
//! Captures development knowledge (logs, decision records, solutions,
//! learnings), retrieves it before agent tasks and feeds task outcomes back
//! into the knowledge statistics.
//!
//! # Architecture
//!
//! - **Embeddings**: text-to-vector and summarization providers
//! - **Storage**: the [`KnowledgeStore`] trait and its SQLite implementation
//! - **RAG**: hybrid retrieval, post-filtering and prompt enhancement
//! - **Journal**: knowledge capture with markdown backups
//! - **Quality**: pure task quality scoring
//! - **Training**: before/after hooks around agent tasks
//! - **Feedback**: failure recording, rating downgrades and optimization
//! - **Monitoring**: read-only reports
//!
//! # Example
//!
//! ```ignore
//! use circulate_core::{AgentTrainingSystem, AgentTask, LiteProvider, SqliteKnowledgeStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> circulate_core::Result<()> {
//!     let store = Arc::new(SqliteKnowledgeStore::open("knowledge.db").await?);
//!     let training = AgentTrainingSystem::new(
//!         store,
//!         Arc::new(LiteProvider::new()),
//!         "./knowledge",
//!         "me",
//!     );
//!
//!     let prompt = training
//!         .before_task(&AgentTask {
//!             description: "Add JWT auth".to_string(),
//!             task_type: "security".to_string(),
//!             complexity: 6,
//!         })
//!         .await;
//!     println!("{}", prompt.prompt);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embeddings;
pub mod error;
pub mod feedback;
pub mod journal;
pub mod monitoring;
pub mod quality;
pub mod rag;
pub mod storage;
pub mod training;
pub mod types;

// Re-export commonly used types
pub use config::CirculateConfig;
pub use embeddings::{EmbeddingProvider, GeminiProvider, LiteProvider};
pub use error::{CirculateError, Result};
pub use feedback::{categorize_error, ErrorCategory, FeedbackLoop};
pub use journal::DevJournalLogger;
pub use monitoring::MonitoringApi;
pub use quality::{calculate_quality, compare_scores, QualityMetrics, QualityScore};
pub use rag::{EnhancedPrompt, RagEngine};
pub use storage::{KnowledgeStore, SqliteKnowledgeStore};
pub use training::AgentTrainingSystem;
pub use types::{
    AdrDecision, AgentExecution, AgentTask, DevLogEntry, ExecutionStatus, KnowledgeId,
    KnowledgeItem, KnowledgeType, OptimizationSuggestion, RetrievedDocument, SearchOptions,
    SecurityLevel, TaskExecution, TaskFailure,
};
