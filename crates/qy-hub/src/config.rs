//! Hub configuration, read from a TOML file. Every key is optional.

use qy_core::{Error, Result};
use qy_engine::{ReasoningConfig, SchemaDescription, DEFAULT_MAX_ATTEMPTS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Result sets larger than this are cut down to `truncate_to` records.
    #[serde(default = "default_truncate_above")]
    pub truncate_above: usize,
    #[serde(default = "default_truncate_to")]
    pub truncate_to: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            truncate_above: default_truncate_above(),
            truncate_to: default_truncate_to(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct QueryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// JSON or TOML description of the collection for the translator.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
            schema_file: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_truncate_above() -> usize {
    200
}
fn default_truncate_to() -> usize {
    50
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_store_path() -> PathBuf {
    PathBuf::from("demos/course_reviews.json")
}
fn default_collection() -> String {
    "course_reviews".to_string()
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// The schema shown to the translator: from `schema_file`, or the built-in one.
    pub fn schema(&self) -> Result<SchemaDescription> {
        let Some(path) = &self.store.schema_file else {
            return Ok(SchemaDescription {
                collection: self.store.collection.clone(),
                ..SchemaDescription::default()
            });
        };
        let content = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.server.truncate_above, 200);
        assert_eq!(config.server.truncate_to, 50);
        assert_eq!(config.query.max_attempts, 2);
        assert_eq!(config.store.collection, "course_reviews");
        assert_eq!(config.reasoning.timeout_secs, 60);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [query]
            max_attempts = 4

            [reasoning]
            base_url = "http://localhost:11434/v1"
            model = "llama3"
            "#,
        )
        .unwrap();
        assert_eq!(config.query.max_attempts, 4);
        assert_eq!(config.reasoning.model, "llama3");
        assert_eq!(config.server.truncate_to, 50);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = Config::parse("[query]\nmax_attempts = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/quarry.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_demo_config_and_schema_parse() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        let mut config = Config::load(&demos.join("quarry.toml")).unwrap();
        assert_eq!(config.store.collection, "course_reviews");
        config.store.schema_file = Some(demos.join("schema.toml"));
        let schema = config.schema().unwrap();
        assert_eq!(schema.fields.len(), 7);
        assert_eq!(schema.fields[6].kind, "date");
    }

    #[test]
    fn test_default_schema_uses_configured_collection() {
        let mut config = Config::default();
        config.store.collection = "reviews_2025".into();
        let schema = config.schema().unwrap();
        assert_eq!(schema.collection, "reviews_2025");
        assert!(!schema.fields.is_empty());
    }
}
