//! CLI Common Utilities
//!
//! Shared context loading and argument helpers for command handlers.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ConfigLoader};
use crate::service::CadService;
use crate::storage::{FileSessionStore, SharedSessionStore};
use crate::types::{CadError, Result};

/// Output format accepted by `--format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid format '{}'. Valid values: text, json", s)),
        }
    }
}

/// Command execution context
///
/// Created via `CommandContext::load()` for commands that talk to the
/// service. Config-only commands use [`ConfigLoader`] directly.
#[derive(Clone)]
pub struct CommandContext {
    pub service: Arc<CadService>,
}

impl CommandContext {
    /// Resolve configuration (an explicit file replaces the layered chain)
    /// and build the service with its HTTP adapters.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let service = CadService::from_config(config)?;
        Ok(Self {
            service: Arc::new(service),
        })
    }

    pub fn config(&self) -> &Config {
        self.service.config()
    }
}

/// Load configuration from `path` when given, otherwise the layered chain
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if !path.exists() => Err(CadError::Config(format!(
            "Config file not found: {}",
            path.display()
        ))),
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Session store over the configured data directory.
///
/// Read-only commands use this so they work without service credentials.
pub fn open_store(config: &Config) -> SharedSessionStore {
    Arc::new(FileSessionStore::new(&config.storage.data_dir))
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
