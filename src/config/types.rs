//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/cadmotion/) and project (.cadmotion/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{generation, network, polling, retention, staging, storage};
use crate::types::{CadError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Session record storage
    pub storage: StorageConfig,

    /// Archive staging limits
    pub staging: StagingConfig,

    /// Translation service settings
    pub translation: TranslationConfig,

    /// Polling policy for asynchronous remote work
    pub polling: PollingConfig,

    /// Generation service settings
    pub generation: GenerationConfig,

    /// Retention sweeper settings
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            storage: StorageConfig::default(),
            staging: StagingConfig::default(),
            translation: TranslationConfig::default(),
            polling: PollingConfig::default(),
            generation: GenerationConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `CadError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.translation.timeout_secs == 0 || self.translation.connect_timeout_secs == 0 {
            return Err(CadError::Config(
                "translation timeouts must be greater than 0".to_string(),
            ));
        }

        if self.generation.timeout_secs == 0 || self.generation.connect_timeout_secs == 0 {
            return Err(CadError::Config(
                "generation timeouts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(CadError::Config(format!(
                "generation temperature must be between 0.0 and 2.0, got {}",
                self.generation.temperature
            )));
        }

        if self.polling.interval_secs == 0 {
            return Err(CadError::Config(
                "polling interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.polling.translation_budget_secs < self.polling.interval_secs
            || self.polling.availability_budget_secs < self.polling.interval_secs
        {
            return Err(CadError::Config(
                "polling budgets must be at least one polling interval".to_string(),
            ));
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(CadError::Config(
                "retention sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        // An in-flight run refreshes updated_at at every stage, but the longest
        // gap between refreshes is a full poll budget.
        let worst_case = self.worst_case_pipeline_secs();
        if self.retention.window_secs <= worst_case {
            return Err(CadError::Config(format!(
                "retention window_secs ({}) must exceed the worst-case pipeline duration ({}s)",
                self.retention.window_secs, worst_case
            )));
        }

        if self.staging.assembly_extensions.is_empty() {
            return Err(CadError::Config(
                "staging assembly_extensions must name at least one extension".to_string(),
            ));
        }

        Ok(())
    }

    /// Upper bound on how long a single run can take
    pub fn worst_case_pipeline_secs(&self) -> u64 {
        let per_call = self.translation.timeout_secs;
        // translation wait + two availability waits + roughly one call per remaining stage
        self.polling.translation_budget_secs
            + 2 * self.polling.availability_budget_secs
            + 8 * per_call
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per job
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(storage::DEFAULT_DATA_DIR),
        }
    }
}

// =============================================================================
// Staging Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// File extensions recognized as a root assembly (without dot, case-insensitive)
    pub assembly_extensions: Vec<String>,
    /// Maximum accepted archive size in bytes
    pub max_archive_bytes: u64,
    /// Maximum total size of the extracted files in bytes
    pub max_uncompressed_bytes: u64,
    /// Maximum number of archive entries
    pub max_entries: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            assembly_extensions: vec![staging::DEFAULT_ASSEMBLY_EXTENSION.to_string()],
            max_archive_bytes: staging::MAX_ARCHIVE_BYTES,
            max_uncompressed_bytes: staging::MAX_UNCOMPRESSED_BYTES,
            max_entries: staging::MAX_ENTRIES,
        }
    }
}

// =============================================================================
// Translation Service Configuration
// =============================================================================

/// Translation service settings
///
/// The client secret is never serialized and is redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// API base URL
    pub api_base: String,
    /// OAuth client id
    pub client_id: Option<String>,
    /// OAuth client secret
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// Prefix for per-job bucket keys
    pub bucket_prefix: String,
    /// Derivative output format
    pub output_format: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("api_base", &self.api_base)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bucket_prefix", &self.bucket_prefix)
            .field("output_format", &self.output_format)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://developer.api.autodesk.com".to_string(),
            client_id: None,
            client_secret: None,
            bucket_prefix: "cadmotion".to_string(),
            output_format: "svf2".to_string(),
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: network::CONNECTION_TIMEOUT_SECS,
        }
    }
}

impl TranslationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Polling Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between status checks
    pub interval_secs: u64,
    /// Maximum wait for translation to finish
    pub translation_budget_secs: u64,
    /// Maximum wait for hierarchy/properties to become available
    pub availability_budget_secs: u64,
    /// Early attempts where "not found" counts as not-yet-ready
    pub not_found_grace_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: polling::INTERVAL_SECS,
            translation_budget_secs: polling::TRANSLATION_BUDGET_SECS,
            availability_budget_secs: polling::AVAILABILITY_BUDGET_SECS,
            not_found_grace_attempts: polling::NOT_FOUND_GRACE_ATTEMPTS,
        }
    }
}

// =============================================================================
// Generation Service Configuration
// =============================================================================

/// Generation service settings
///
/// API keys are never serialized and are redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API base URL (OpenAI-compatible chat completions)
    pub api_base: String,
    /// Model name
    pub model: String,
    /// API key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: generation::TIMEOUT_SECS,
            connect_timeout_secs: network::CONNECTION_TIMEOUT_SECS,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Records idle longer than this are expired
    pub window_secs: u64,
    /// Sweep period
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: retention::WINDOW_SECS,
            sweep_interval_secs: retention::SWEEP_INTERVAL_SECS,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
