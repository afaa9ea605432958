use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TracklistError};
use crate::fusion::FusionParams;
use crate::schema::{IndexType, MetricType};
use crate::types::DEFAULT_QUERY_PREFIX;

/// Top-level configuration for Tracklist.
///
/// Loaded from `~/.tracklist/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracklistConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl TracklistConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TracklistConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Path of the SQLite database: `database_file` relative to `data_dir`
    /// unless it is already absolute.
    pub fn database_path(&self) -> PathBuf {
        let file = Path::new(&self.store.database_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            expand_home(&self.general.data_dir).join(file)
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))
        {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the database and log files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Also write a daily rolling log file under `<data_dir>/logs`.
    pub log_to_file: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.tracklist/data".to_string(),
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

/// Store location and the collection operated on by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_file: String,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: "tracklist.db".to_string(),
            collection: "asot_songs".to_string(),
        }
    }
}

/// Collection schema options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub auto_id: bool,
    /// Keep undeclared document attributes in `$meta`.
    pub enable_dynamic_field: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            auto_id: true,
            enable_dynamic_field: true,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "onnx" or "mock".
    pub backend: String,
    /// Model name, informational.
    pub model: String,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    pub dimension: usize,
    /// Prefix prepended to text on the dense path.
    pub query_prefix: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            model: "intfloat/e5-large-v2".to_string(),
            model_dir: "~/.tracklist/models/e5-large-v2".to_string(),
            dimension: 1024,
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
        }
    }
}

/// Index declarations for the dense and lexical fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dense_index_kind: IndexType,
    pub dense_metric: MetricType,
    /// Cluster count for IVF indexes.
    pub dense_nlist: u32,
    pub lexical_index_kind: IndexType,
    /// Inverted-index traversal algorithm, e.g. "DAAT_MAXSCORE".
    pub lexical_scoring_algorithm: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dense_index_kind: IndexType::IvfFlat,
            dense_metric: MetricType::Ip,
            dense_nlist: 128,
            lexical_index_kind: IndexType::SparseInvertedIndex,
            lexical_scoring_algorithm: "DAAT_MAXSCORE".to_string(),
        }
    }
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// "weighted" or "rrf".
    pub default_strategy: String,
    pub sparse_weight: f64,
    pub dense_weight: f64,
    pub rrf_k: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let params = FusionParams::default();
        Self {
            default_limit: 5,
            default_strategy: crate::fusion::WEIGHTED.to_string(),
            sparse_weight: params.sparse_weight,
            dense_weight: params.dense_weight,
            rrf_k: params.k,
        }
    }
}

impl SearchConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            sparse_weight: self.sparse_weight,
            dense_weight: self.dense_weight,
            k: self.rrf_k,
        }
    }

    /// Reject limits of zero.
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            return Err(TracklistError::Config(
                "search.default_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = TracklistConfig::default();
        assert_eq!(config.general.data_dir, "~/.tracklist/data");
        assert_eq!(config.general.log_level, "info");
        assert!(!config.general.log_to_file);
        assert_eq!(config.store.collection, "asot_songs");
        assert!(config.schema.auto_id);
        assert!(config.schema.enable_dynamic_field);
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.embedding.query_prefix, "query: ");
        assert_eq!(config.index.dense_index_kind, IndexType::IvfFlat);
        assert_eq!(config.index.dense_metric, MetricType::Ip);
        assert_eq!(config.index.dense_nlist, 128);
        assert_eq!(config.index.lexical_index_kind, IndexType::SparseInvertedIndex);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.default_strategy, "weighted");
        assert!((config.search.sparse_weight - 0.3).abs() < f64::EPSILON);
        assert!((config.search.dense_weight - 0.7).abs() < f64::EPSILON);
        assert!((config.search.rrf_k - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"
log_to_file = true

[store]
database_file = "songs.db"
collection = "test_songs"

[embedding]
backend = "mock"
dimension = 384

[index]
dense_index_kind = "FLAT"
dense_metric = "COSINE"

[search]
default_strategy = "rrf"
rrf_k = 30.0
"#;
        let file = create_temp_config(content);
        let config = TracklistConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert!(config.general.log_to_file);
        assert_eq!(config.store.collection, "test_songs");
        assert_eq!(config.embedding.backend, "mock");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.index.dense_index_kind, IndexType::Flat);
        assert_eq!(config.index.dense_metric, MetricType::Cosine);
        assert_eq!(config.search.default_strategy, "rrf");
        assert!((config.search.fusion_params().k - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.database_path(), PathBuf::from("/custom/data/songs.db"));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = TracklistConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.store.collection, "asot_songs");
        assert_eq!(config.index.dense_nlist, 128);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TracklistConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.tracklist/data");
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(TracklistConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_unknown_index_kind_is_rejected() {
        let file = create_temp_config("[index]\ndense_index_kind = \"ANNOY\"\n");
        assert!(TracklistConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = TracklistConfig::default();
        config.store.collection = "saved".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = TracklistConfig::load(&path).unwrap();
        assert_eq!(reloaded.store.collection, "saved");
        assert_eq!(reloaded.index.dense_metric, MetricType::Ip);
    }

    #[test]
    fn test_database_path_absolute_file() {
        let mut config = TracklistConfig::default();
        config.general.data_dir = "/data".to_string();
        config.store.database_file = "/elsewhere/x.db".to_string();
        assert_eq!(config.database_path(), PathBuf::from("/elsewhere/x.db"));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("relative"), PathBuf::from("relative"));
    }

    #[test]
    fn test_search_validate() {
        let mut search = SearchConfig::default();
        assert!(search.validate().is_ok());
        search.default_limit = 0;
        assert!(search.validate().is_err());
    }
}
