use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::chunker::{ChunkRules, DEFAULT_LOOKBACK_CHARS, DEFAULT_MAX_CHARS};
use crate::detector::{DetectionSchema, OllamaConfig, RetryPolicy};
use crate::error::{RedactError, Result};
use crate::registry::{NamePatterns, TermRegistry};

/// Run configuration, loadable from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Checkpoint after every this many chunks in each phase
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    #[serde(default)]
    pub names: NameConfig,

    /// Surface forms never registered, compared case-insensitively
    #[serde(default = "default_ignored_terms")]
    pub ignored_terms: Vec<String>,

    /// Expected category → subcategory layout of detector responses
    #[serde(default)]
    pub schema: DetectionSchema,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-attempt detector timeout
    #[serde(default = "default_detector_timeout_secs")]
    pub detector_timeout_secs: u64,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default = "default_true")]
    pub show_progress: bool,

    #[serde(default)]
    pub use_mmap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_lookback_chars")]
    pub lookback_chars: usize,

    #[serde(default = "default_end_punctuation")]
    pub end_punctuation: Vec<char>,
}

/// Given-name lists that pick the gendered pseudonym families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameConfig {
    #[serde(default = "default_male_patterns")]
    pub male_patterns: Vec<String>,

    #[serde(default = "default_female_patterns")]
    pub female_patterns: Vec<String>,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            checkpoint_interval: default_checkpoint_interval(),
            names: NameConfig::default(),
            ignored_terms: default_ignored_terms(),
            schema: DetectionSchema::default(),
            retry: RetryPolicy::default(),
            detector_timeout_secs: default_detector_timeout_secs(),
            ollama: OllamaConfig::default(),
            show_progress: true,
            use_mmap: false,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            lookback_chars: default_lookback_chars(),
            end_punctuation: default_end_punctuation(),
        }
    }
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            male_patterns: default_male_patterns(),
            female_patterns: default_female_patterns(),
        }
    }
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_lookback_chars() -> usize {
    DEFAULT_LOOKBACK_CHARS
}

fn default_end_punctuation() -> Vec<char> {
    vec!['.', '!', '?']
}

fn default_checkpoint_interval() -> usize {
    5
}

fn default_detector_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_male_patterns() -> Vec<String> {
    ["ben", "rogelio", "will"].map(String::from).to_vec()
}

fn default_female_patterns() -> Vec<String> {
    vec!["andrea".to_string()]
}

fn default_ignored_terms() -> Vec<String> {
    ["cities", "states", "countries", "months", "days_of_week"]
        .map(String::from)
        .to_vec()
}

impl RedactConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RedactError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
            .map_err(|e| RedactError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RedactConfig = toml::from_str(content).map_err(|e| RedactError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RedactError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            return Err(RedactError::Config("chunking.max_chars must be greater than zero".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(RedactError::Config("checkpoint_interval must be greater than zero".into()));
        }
        if self.detector_timeout_secs == 0 {
            return Err(RedactError::Config("detector_timeout_secs must be greater than zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RedactError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn chunk_rules(&self) -> ChunkRules {
        ChunkRules {
            max_chars: self.chunking.max_chars,
            lookback_chars: self.chunking.lookback_chars,
            end_punctuation: self.chunking.end_punctuation.clone(),
        }
    }

    pub fn name_patterns(&self) -> NamePatterns {
        NamePatterns::new(&self.names.male_patterns, &self.names.female_patterns)
    }

    /// Empty registry configured with the name patterns and ignore list
    pub fn new_registry(&self) -> TermRegistry {
        TermRegistry::new(self.name_patterns()).with_ignored(&self.ignored_terms)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_secs(self.detector_timeout_secs)
    }
}
