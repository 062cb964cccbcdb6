//! Configuration management for Lectern
//!
//! Configuration is loaded from TOML, overridden from `LECTERN_SECTION__KEY`
//! environment variables, then validated as a whole.

use crate::embedding::QuotaPolicy;
use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta", default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// File stem of the persisted vector index
    pub index_name: String,
    /// Write the index and corpus back to disk after every mutation
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.lectern"),
            index_name: "vector_store".to_string(),
            persist: true,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Providers in fallback order: "openai", "local", "hashing"
    pub providers: Vec<String>,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub on_quota: QuotaPolicy,
    /// Model used by the "local" provider
    pub local_model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            providers: vec!["openai".to_string(), "hashing".to_string()],
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 50,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            on_quota: QuotaPolicy::Degrade,
            local_model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Retrieval cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    /// Vector tier results below this cosine score are discarded
    pub vector_min_score: f32,
    /// Lexical tier results below this cosine score are discarded
    pub lexical_min_score: f32,
    pub keyword_chunks_per_document: usize,
    pub keyword_max_chunks: usize,
    /// Search an index holding random substitute vectors anyway
    pub trust_degraded_index: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 50,
            vector_min_score: 0.7,
            lexical_min_score: 0.3,
            keyword_chunks_per_document: 2,
            keyword_max_chunks: 6,
            trust_degraded_index: false,
        }
    }
}

/// Generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Gemini,
}

/// One generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn openai() -> Self {
        Self {
            kind: ProviderKind::Openai,
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }

    pub fn gemini() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

/// Generation retry and failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Candidates in preference order; the first two that initialize are used
    pub providers: Vec<ProviderConfig>,
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub jitter_secs: f64,
    /// Wall-clock budget for one `generate` call across both providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_budget_secs: Option<f64>,
    pub default_persona: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::gemini(), ProviderConfig::openai()],
            max_attempts: 3,
            base_delay_secs: 1.0,
            jitter_secs: 1.0,
            request_budget_secs: None,
            default_persona: "You are a helpful AI assistant.".to_string(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_quota: Option<QuotaPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_min_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LecternError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LecternError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        std::fs::write(path, content).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LecternError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(providers) = overrides.embedding_providers {
            self.embedding.providers = providers;
        }
        if let Some(policy) = overrides.on_quota {
            self.embedding.on_quota = policy;
        }
        if let Some(score) = overrides.vector_min_score {
            self.retrieval.vector_min_score = score;
        }
        if let Some(attempts) = overrides.max_attempts {
            self.generation.max_attempts = attempts;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LECTERN_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LECTERN_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let invalid = |expected: &str| LecternError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}' as {}", value, expected),
        };

        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__PROVIDERS" => {
                self.embedding.providers = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__ON_QUOTA" => {
                self.embedding.on_quota = match value {
                    "degrade" => QuotaPolicy::Degrade,
                    "random" => QuotaPolicy::Random,
                    _ => return Err(invalid("\"degrade\" or \"random\"")),
                };
            }
            "RETRIEVAL__VECTOR_MIN_SCORE" => {
                self.retrieval.vector_min_score = value.parse().map_err(|_| invalid("float"))?;
            }
            "RETRIEVAL__LEXICAL_MIN_SCORE" => {
                self.retrieval.lexical_min_score = value.parse().map_err(|_| invalid("float"))?;
            }
            "GENERATION__MAX_ATTEMPTS" => {
                self.generation.max_attempts = value.parse().map_err(|_| invalid("integer"))?;
            }
            "GENERATION__BASE_DELAY_SECS" => {
                self.generation.base_delay_secs = value.parse().map_err(|_| invalid("float"))?;
            }
            "GENERATION__REQUEST_BUDGET_SECS" => {
                self.generation.request_budget_secs =
                    Some(value.parse().map_err(|_| invalid("float"))?);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("lectern").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".lectern"))
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LecternError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
