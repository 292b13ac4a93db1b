//! Core data types for the circulate knowledge system
//!
//! Knowledge items, the projections returned by searches, and the task
//! records that flow into the training and feedback loops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CirculateError;

/// Unique identifier for knowledge items
///
/// Assigned by the store at insert time and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeId(pub Uuid);

impl KnowledgeId {
    /// Create a new random knowledge ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a knowledge ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KnowledgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Kind of captured knowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    DevLog,
    Adr,
    Solution,
    Learning,
    PromptTemplate,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::DevLog => "dev_log",
            KnowledgeType::Adr => "adr",
            KnowledgeType::Solution => "solution",
            KnowledgeType::Learning => "learning",
            KnowledgeType::PromptTemplate => "prompt_template",
        }
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeType {
    type Err = CirculateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev_log" => Ok(KnowledgeType::DevLog),
            "adr" => Ok(KnowledgeType::Adr),
            "solution" => Ok(KnowledgeType::Solution),
            "learning" => Ok(KnowledgeType::Learning),
            "prompt_template" => Ok(KnowledgeType::PromptTemplate),
            other => Err(CirculateError::Validation(format!(
                "Unknown knowledge type: {}",
                other
            ))),
        }
    }
}

/// Confidentiality tier, ordered by increasing restriction
///
/// The derived `Ord` follows declaration order, so a retrieval cap of
/// `Internal` admits `Public` and `Internal` documents only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Public => "public",
            SecurityLevel::Internal => "internal",
            SecurityLevel::Confidential => "confidential",
            SecurityLevel::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = CirculateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(SecurityLevel::Public),
            "internal" => Ok(SecurityLevel::Internal),
            "confidential" => Ok(SecurityLevel::Confidential),
            "restricted" => Ok(SecurityLevel::Restricted),
            other => Err(CirculateError::Validation(format!(
                "Unknown security level: {}",
                other
            ))),
        }
    }
}

/// A persisted unit of development knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub knowledge_type: KnowledgeType,
    pub tags: Vec<String>,
    pub phase: Option<String>,
    pub author: Option<String>,
    pub complexity: u8,
    pub security_level: SecurityLevel,
    pub related_commits: Vec<String>,

    // Usage statistics
    pub usage_count: u32,
    pub avg_rating: f64,
    pub failure_count: u32,
    pub failure_rate: f64,
    pub last_used_at: Option<DateTime<Utc>>,

    // Lifecycle
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub retention_days: u32,
}

impl KnowledgeItem {
    /// Whole days elapsed since the item was created
    pub fn days_since_creation(&self) -> i64 {
        Utc::now().signed_duration_since(self.created_at).num_days()
    }
}

/// Row handed to the store for a new knowledge item
///
/// Usage statistics are not part of it: the store starts them at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKnowledge {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub embedding: Vec<f32>,
    pub phase: String,
    pub tags: Vec<String>,
    pub author: String,
    pub complexity: u8,
    pub security_level: SecurityLevel,
    pub related_commits: Vec<String>,
}

/// Read-only projection of a knowledge item returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    /// Relevance; meaning depends on the search that produced it
    pub score: f64,
    pub knowledge_type: KnowledgeType,
    pub tags: Vec<String>,
}

/// Options for hybrid retrieval
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_similarity: f64,
    /// OR semantics; ignored when empty
    pub filter_tags: Vec<String>,
    pub filter_phase: Option<String>,
    /// Most restrictive level the caller may see
    pub security_level: SecurityLevel,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.7,
            filter_tags: Vec::new(),
            filter_phase: None,
            security_level: SecurityLevel::Public,
        }
    }
}

/// A unit of knowledge to be captured by the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevLogEntry {
    pub title: String,
    pub content: String,
    pub knowledge_type: KnowledgeType,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub complexity: Option<u8>,
    #[serde(default)]
    pub security_level: Option<SecurityLevel>,
    #[serde(default)]
    pub related_commits: Option<Vec<String>>,
    /// Operator identity; the journal's configured author is used when absent
    #[serde(default)]
    pub author: Option<String>,
}

impl DevLogEntry {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        knowledge_type: KnowledgeType,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            knowledge_type,
            phase: None,
            tags: None,
            complexity: None,
            security_level: None,
            related_commits: None,
            author: None,
        }
    }
}

/// Architecture decision record input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdrDecision {
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
    #[serde(default)]
    pub alternatives: Option<String>,
}

/// Task about to be handed to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub description: String,
    pub task_type: String,
    pub complexity: u8,
}

/// Outcome of a finished agent task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub description: String,
    pub solution: String,
    /// 1-10
    pub quality: f64,
    /// Minutes
    pub time_spent: f64,
    pub used_knowledge: Vec<KnowledgeId>,
}

/// A failed agent task, persisted for analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub description: String,
    pub error_message: String,
    pub attempted_knowledge: Vec<KnowledgeId>,
    pub timestamp: DateTime<Utc>,
}

/// A task failure as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: i64,
    pub task_id: String,
    pub description: String,
    pub error_message: String,
    pub attempted_knowledge: Vec<KnowledgeId>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome class of an agent execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = CirculateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(CirculateError::Validation(format!(
                "Unknown execution status: {}",
                other
            ))),
        }
    }
}

/// One agent task run, kept for the execution reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_name: String,
    pub task_description: String,
    #[serde(default)]
    pub phase: Option<String>,
    pub status: ExecutionStatus,
    /// 1-10 for successes, 0 for failures
    pub quality_score: f64,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Learning progress for a project phase
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LearningCurveMetrics {
    pub tasks_completed: usize,
    pub avg_quality: f64,
    /// Not derivable from knowledge records; always 0
    pub avg_time_spent: f64,
    pub knowledge_growth: f64,
}

/// Action proposed for a knowledge item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Improve,
    Archive,
    Split,
    Merge,
}

impl std::fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionKind::Improve => write!(f, "improve"),
            SuggestionKind::Archive => write!(f, "archive"),
            SuggestionKind::Split => write!(f, "split"),
            SuggestionKind::Merge => write!(f, "merge"),
        }
    }
}

/// Derived, non-persistent optimization hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub knowledge_id: KnowledgeId,
    pub current_rating: f64,
    pub usage_count: u32,
    pub failure_rate: f64,
    pub suggestion: SuggestionKind,
    pub reason: String,
}

/// Counters reported by the store-side archival procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchiveCounts {
    pub archived: usize,
    pub compressed: usize,
}
