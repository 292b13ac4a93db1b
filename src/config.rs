//! Layered configuration for circulate
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - TOML file (`--config`, else `<config_dir>/circulate/config.toml` if present)
//! - environment variables `CIRCULATE_*`, nested with `__`
//!   (e.g. `CIRCULATE_EMBEDDING__PROVIDER=lite`)
//!
//! The Gemini API key may also come from `GEMINI_API_KEY`.

use crate::embeddings::{EmbeddingProvider, GeminiProvider, LiteProvider, DEFAULT_EMBEDDING_DIM};
use crate::error::{CirculateError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const APP_DIR: &str = "circulate";
const ENV_PREFIX: &str = "CIRCULATE";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Author recorded when no operator identity is available
pub const FALLBACK_AUTHOR: &str = "circulate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    /// Offline hashing embedder
    Lite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub summary_model: String,
    pub dimensions: usize,
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            api_key: None,
            model: "text-embedding-004".to_string(),
            summary_model: "gemini-pro".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIM,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CirculateConfig {
    pub database_path: PathBuf,
    /// Root of the dated markdown backups
    pub knowledge_dir: PathBuf,
    /// Operator identity stamped on captured knowledge
    pub author: Option<String>,
    /// Current project phase
    pub phase: Option<String>,
    pub embedding: EmbeddingConfig,
}

impl Default for CirculateConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            knowledge_dir: PathBuf::from("./knowledge"),
            author: None,
            phase: None,
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("knowledge.db"))
        .unwrap_or_else(|| PathBuf::from("circulate.db"))
}

/// `<config_dir>/circulate/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

impl CirculateConfig {
    /// Load from defaults, the config file and the environment
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                builder = builder.add_source(File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: CirculateConfig = settings.try_deserialize()?;
        config.embedding.api_key =
            resolve_api_key(config.embedding.api_key.take(), env::var(API_KEY_ENV).ok());

        Ok(config)
    }

    /// Render as TOML, with the API key left out
    pub fn to_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.embedding.api_key = None;
        toml::to_string_pretty(&redacted)
            .map_err(|e| CirculateError::Other(format!("Failed to render config: {}", e)))
    }

    /// Write the default configuration to `path`; an existing file is kept
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default().to_toml()?)?;
        info!("Wrote default config to {}", path.display());
        Ok(true)
    }

    /// Configured author, else `$USER`, else [`FALLBACK_AUTHOR`]
    pub fn resolved_author(&self) -> String {
        resolve_author(self.author.clone(), env::var("USER").ok())
    }

    /// Build the configured embedding provider
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedding = &self.embedding;
        match embedding.provider {
            ProviderKind::Lite => {
                info!("Using offline embedding provider");
                Ok(Arc::new(LiteProvider::with_dimensions(embedding.dimensions)))
            }
            ProviderKind::Gemini => {
                let api_key = embedding.api_key.clone().ok_or_else(|| {
                    CirculateError::Config(config::ConfigError::Message(format!(
                        "Gemini API key not found. Set {} or embedding.api_key, \
                         or use embedding.provider = \"lite\"",
                        API_KEY_ENV
                    )))
                })?;
                info!("Using Gemini embedding model {}", embedding.model);
                Ok(Arc::new(GeminiProvider::new(
                    api_key,
                    Some(embedding.model.clone()),
                    Some(embedding.summary_model.clone()),
                    embedding.base_url.clone(),
                    Some(embedding.dimensions),
                )?))
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_api_key(configured: Option<String>, from_env: Option<String>) -> Option<String> {
    non_empty(configured).or_else(|| non_empty(from_env))
}

fn resolve_author(configured: Option<String>, user: Option<String>) -> String {
    non_empty(configured)
        .or_else(|| non_empty(user))
        .unwrap_or_else(|| FALLBACK_AUTHOR.to_string())
}
