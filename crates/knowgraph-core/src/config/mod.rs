//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::knowledge::ResourceLimits;

/// Knowgraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub dedup: DedupConfig,
    pub resilience: ResilienceConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "openai/gpt-4o-mini".to_string(),
            fallback_models: vec!["anthropic/claude-3-5-haiku-latest".to_string()],
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    /// Texts sent per provider call
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 100,
        }
    }
}

/// Which AI extraction strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStrategy {
    /// One call requesting every relationship type
    SinglePass,
    /// One concurrent call per relationship type
    #[default]
    FourStage,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePass => "single-pass",
            Self::FourStage => "four-stage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "single-pass" | "single_pass" | "single" => Some(Self::SinglePass),
            "four-stage" | "four_stage" | "four" => Some(Self::FourStage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub preserve_paragraphs: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            overlap_tokens: 200,
            preserve_paragraphs: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub strategy: ExtractionStrategy,
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub semantic: bool,
    pub similarity_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic: true,
            similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Per-call timeout
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Relational database file; empty means the default location
    pub database_path: Option<PathBuf>,
    /// Vector database file; kept apart from the relational one
    pub vector_database_path: Option<PathBuf>,
    pub max_connections: u32,
    pub transaction_max_wait_ms: u64,
    pub transaction_timeout_ms: u64,
    pub max_triples_per_batch: usize,
    pub max_concepts_per_batch: usize,
    pub max_conceptualizations_per_batch: usize,
    /// Escalate phase 2 to a rollback after this many lookup misses
    pub max_lookup_misses: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            vector_database_path: None,
            max_connections: 5,
            transaction_max_wait_ms: 5_000,
            transaction_timeout_ms: 30_000,
            max_triples_per_batch: 10_000,
            max_concepts_per_batch: 5_000,
            max_conceptualizations_per_batch: 20_000,
            max_lookup_misses: None,
        }
    }
}

impl StorageConfig {
    pub fn transaction_max_wait(&self) -> Duration {
        Duration::from_millis(self.transaction_max_wait_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resource_limits: ResourceLimits,
    pub schedule_deduplication: bool,
    pub dispatch_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resource_limits: ResourceLimits::default(),
            schedule_deduplication: true,
            dispatch_timeout_ms: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("KNOWGRAPH_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KNOWGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("knowgraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        let chunking = &self.extraction.chunking;
        if chunking.max_tokens == 0 {
            return Err(anyhow!("extraction.chunking.max_tokens must be greater than 0"));
        }
        if chunking.overlap_tokens >= chunking.max_tokens {
            return Err(anyhow!(
                "extraction.chunking.overlap_tokens must be smaller than max_tokens"
            ));
        }
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(anyhow!("dedup.similarity_threshold must be between 0.0 and 1.0"));
        }
        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(anyhow!("embedding.dimension and embedding.batch_size must be positive"));
        }
        if self.resilience.circuit_breaker.failure_threshold == 0 {
            return Err(anyhow!("resilience.circuit_breaker.failure_threshold must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "embedding.model" => Ok(self.embedding.model.clone()),
            "embedding.dimension" => Ok(self.embedding.dimension.to_string()),
            "embedding.batch_size" => Ok(self.embedding.batch_size.to_string()),

            "extraction.strategy" => Ok(self.extraction.strategy.as_str().to_string()),
            "extraction.chunking.max_tokens" => Ok(self.extraction.chunking.max_tokens.to_string()),
            "extraction.chunking.overlap_tokens" => {
                Ok(self.extraction.chunking.overlap_tokens.to_string())
            }
            "extraction.chunking.preserve_paragraphs" => {
                Ok(self.extraction.chunking.preserve_paragraphs.to_string())
            }

            "dedup.enabled" => Ok(self.dedup.enabled.to_string()),
            "dedup.semantic" => Ok(self.dedup.semantic.to_string()),
            "dedup.similarity_threshold" => Ok(self.dedup.similarity_threshold.to_string()),

            "resilience.retry.max_retries" => Ok(self.resilience.retry.max_retries.to_string()),
            "resilience.circuit_breaker.failure_threshold" => {
                Ok(self.resilience.circuit_breaker.failure_threshold.to_string())
            }

            "storage.database_path" => Ok(display_path(self.storage.database_path.as_ref())),
            "storage.vector_database_path" => Ok(display_path(self.storage.vector_database_path.as_ref())),
            "storage.max_lookup_misses" => Ok(self
                .storage
                .max_lookup_misses
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string())),

            "pipeline.schedule_deduplication" => {
                Ok(self.pipeline.schedule_deduplication.to_string())
            }

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use KNOWGRAPH_API_KEY or OPENROUTER_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `knowgraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }
            "embedding.model" => {
                self.embedding.model = value.to_string();
            }
            "embedding.dimension" => {
                self.embedding.dimension = value
                    .parse()
                    .with_context(|| format!("Invalid dimension value: {}", value))?;
            }
            "embedding.batch_size" => {
                self.embedding.batch_size = value
                    .parse()
                    .with_context(|| format!("Invalid batch_size value: {}", value))?;
            }
            "extraction.strategy" => {
                self.extraction.strategy = ExtractionStrategy::parse(value).ok_or_else(|| {
                    anyhow!(
                        "Invalid extraction strategy: {}. Valid options: single-pass, four-stage",
                        value
                    )
                })?;
            }
            "extraction.chunking.max_tokens" => {
                self.extraction.chunking.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "extraction.chunking.overlap_tokens" => {
                self.extraction.chunking.overlap_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid overlap_tokens value: {}", value))?;
            }
            "extraction.chunking.preserve_paragraphs" => {
                self.extraction.chunking.preserve_paragraphs = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "dedup.enabled" => {
                self.dedup.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "dedup.semantic" => {
                self.dedup.semantic = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "dedup.similarity_threshold" => {
                let threshold: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid similarity_threshold value: {}", value))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!("Similarity threshold must be between 0.0 and 1.0"));
                }
                self.dedup.similarity_threshold = threshold;
            }
            "resilience.retry.max_retries" => {
                self.resilience.retry.max_retries = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries value: {}", value))?;
            }
            "resilience.circuit_breaker.failure_threshold" => {
                self.resilience.circuit_breaker.failure_threshold = value
                    .parse()
                    .with_context(|| format!("Invalid failure_threshold value: {}", value))?;
            }
            "storage.database_path" => {
                self.storage.database_path = parse_path(value);
            }
            "storage.vector_database_path" => {
                self.storage.vector_database_path = parse_path(value);
            }
            "storage.max_lookup_misses" => {
                self.storage.max_lookup_misses = if value == "unlimited" {
                    None
                } else {
                    Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid max_lookup_misses value: {}", value))?,
                    )
                };
            }
            "pipeline.schedule_deduplication" => {
                self.pipeline.schedule_deduplication = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the KNOWGRAPH_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `knowgraph config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.default_model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "embedding.model",
            "embedding.dimension",
            "embedding.batch_size",
            "extraction.strategy",
            "extraction.chunking.max_tokens",
            "extraction.chunking.overlap_tokens",
            "extraction.chunking.preserve_paragraphs",
            "dedup.enabled",
            "dedup.semantic",
            "dedup.similarity_threshold",
            "resilience.retry.max_retries",
            "resilience.circuit_breaker.failure_threshold",
            "storage.database_path",
            "storage.vector_database_path",
            "storage.max_lookup_misses",
            "pipeline.schedule_deduplication",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "default".to_string())
}

/// `"default"` or an empty value clears the override
fn parse_path(value: &str) -> Option<PathBuf> {
    match value.trim() {
        "" | "default" => None,
        path => Some(PathBuf::from(path)),
    }
}
