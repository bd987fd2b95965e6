use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoreConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub policy: PolicyFileConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"hash"` (deterministic feature hashing) or `"none"` to disable the
    /// semantic scorer.
    pub provider: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub weight_lexical: f64,
    pub weight_semantic: f64,
    pub weight_graph: f64,
}

/// Policy settings loaded at startup into the process-wide policy engine.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PolicyFileConfig {
    /// Per-operation required fields, e.g. `store = ["topic", "content"]`.
    /// Empty map keeps the built-in defaults.
    pub required_fields: HashMap<String, Vec<String>>,
    /// Mutations carrying a confidence below this floor are rejected.
    pub min_confidence: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7878,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_lore_dir()
            .join("knowledge.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".into(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 200,
            weight_lexical: 0.3,
            weight_semantic: 0.5,
            weight_graph: 0.2,
        }
    }
}

/// Returns `~/.lore/`
pub fn default_lore_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".lore")
}

/// Returns the default config file path: `~/.lore/config.toml`
pub fn default_config_path() -> PathBuf {
    default_lore_dir().join("config.toml")
}

impl LoreConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            LoreConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (LORE_DB, LORE_LOG_LEVEL,
    /// LORE_EMBEDDING).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LORE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("LORE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("LORE_EMBEDDING") {
            self.embedding.provider = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LoreConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.retrieval.default_limit, 20);
        assert_eq!(config.retrieval.max_limit, 200);
        assert!(config.storage.db_path.ends_with("knowledge.db"));
        assert!(config.policy.min_confidence.is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[retrieval]
default_limit = 10
weight_semantic = 0.6

[policy]
min_confidence = 0.4

[policy.required_fields]
store = ["topic", "content", "source"]
"#;
        let config: LoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.retrieval.default_limit, 10);
        assert!((config.retrieval.weight_semantic - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.policy.min_confidence, Some(0.4));
        assert_eq!(
            config.policy.required_fields["store"],
            vec!["topic", "content", "source"]
        );
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.max_limit, 200);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = LoreConfig::default();
        std::env::set_var("LORE_DB", "/tmp/override.db");
        std::env::set_var("LORE_LOG_LEVEL", "trace");
        std::env::set_var("LORE_EMBEDDING", "none");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.embedding.provider, "none");

        // Clean up
        std::env::remove_var("LORE_DB");
        std::env::remove_var("LORE_LOG_LEVEL");
        std::env::remove_var("LORE_EMBEDDING");
    }
}
