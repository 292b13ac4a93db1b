//! Shared helper functions for CLI commands
//!
//! Configuration loading, store/provider construction, argument parsing and
//! output formatting used across command handlers.

use circulate_core::{
    error::{CirculateError, Result},
    training::QUALITY_RANGE,
    CirculateConfig, EmbeddingProvider, KnowledgeId, KnowledgeStore, LiteProvider,
    SqliteKnowledgeStore,
};
use clap::ValueEnum;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Output format shared by every command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Options accepted before the subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

/// Loaded configuration plus an open store
pub struct Runtime {
    pub config: CirculateConfig,
    pub store: Arc<dyn KnowledgeStore>,
}

impl Runtime {
    pub async fn open(options: &GlobalOptions) -> Result<Self> {
        let mut config = CirculateConfig::load(options.config_path.as_deref())?;
        if let Some(db_path) = &options.db_path {
            config.database_path = db_path.clone();
        }
        debug!("Using database: {}", config.database_path.display());

        let store: Arc<dyn KnowledgeStore> =
            Arc::new(SqliteKnowledgeStore::open(&config.database_path).await?);
        Ok(Self { config, store })
    }

    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.config.build_provider()
    }

    /// Provider for commands that never embed or summarize
    ///
    /// Falls back to the offline provider so listing commands work without
    /// an API key.
    pub fn reader_provider(&self) -> Arc<dyn EmbeddingProvider> {
        match self.config.build_provider() {
            Ok(provider) => provider,
            Err(e) => {
                debug!("Embedding provider unavailable ({}), using offline provider", e);
                Arc::new(LiteProvider::with_dimensions(self.config.embedding.dimensions))
            }
        }
    }

    /// Explicit phase, else the configured one
    pub fn phase(&self, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| self.config.phase.clone())
    }
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
}

pub fn parse_ids(raw: &[String]) -> Result<Vec<KnowledgeId>> {
    raw.iter()
        .map(|s| KnowledgeId::from_string(s).map_err(CirculateError::from))
        .collect()
}

/// Clap parser for task quality ratings
pub fn parse_quality(raw: &str) -> std::result::Result<f64, String> {
    let quality: f64 = raw
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    if QUALITY_RANGE.contains(&quality) {
        Ok(quality)
    } else {
        Err(format!(
            "{} is not in {}..={}",
            raw,
            QUALITY_RANGE.start(),
            QUALITY_RANGE.end()
        ))
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// First `max` characters, with an ellipsis when cut
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(Some("rust, async,,db ".to_string())),
            Some(vec!["rust".to_string(), "async".to_string(), "db".to_string()])
        );
        assert_eq!(parse_list(None), None);
    }

    #[test]
    fn test_parse_ids_rejects_garbage() {
        let id = KnowledgeId::new();
        assert_eq!(parse_ids(&[id.to_string()]).unwrap(), vec![id]);
        assert!(parse_ids(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_parse_quality_bounds() {
        assert_eq!(parse_quality("7.5"), Ok(7.5));
        assert_eq!(parse_quality("10"), Ok(10.0));
        assert!(parse_quality("50").is_err());
        assert!(parse_quality("0").is_err());
        assert!(parse_quality("NaN").is_err());
        assert!(parse_quality("high").is_err());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
    }
}
