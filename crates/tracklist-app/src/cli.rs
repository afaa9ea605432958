//! CLI argument definitions for the tracklist binary.
//!
//! Uses `clap` with derive macros.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tracklist_core::fusion::{FusionParams, FusionStrategy};
use tracklist_core::{Result, TracklistConfig};
use tracklist_vector::SearchMode;

/// Tracklist - hybrid search over radio show tracklists.
#[derive(Parser, Debug)]
#[command(name = "tracklist", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the database and logs.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Collection to operate on.
    #[arg(long = "collection", global = true)]
    pub collection: Option<String>,

    /// Log filter (trace, debug, info, warn, error, or a directive list).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the collection.
    Create,
    /// Drop the collection.
    Drop,
    /// List all collections.
    Collections,
    /// Show row count, episodes and schema of the collection.
    Stats,
    /// List the episodes stored in the collection.
    Episodes,
    /// Ingest songs from a JSON file or a directory of JSON files.
    Ingest {
        path: PathBuf,
        /// Create the collection first if it does not exist.
        #[arg(long)]
        create: bool,
    },
    /// Print the episode URLs from a file that are not ingested yet.
    Pending { urls_file: PathBuf },
    /// Search the collection.
    Search(SearchArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Dense,
    Lexical,
    Hybrid,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dense => SearchMode::Dense,
            ModeArg::Lexical => SearchMode::Lexical,
            ModeArg::Hybrid => SearchMode::Hybrid,
        }
    }
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
    pub mode: ModeArg,

    /// Fusion strategy for hybrid search (weighted or rrf).
    #[arg(long)]
    pub strategy: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub sparse_weight: Option<f64>,

    #[arg(long)]
    pub dense_weight: Option<f64>,

    #[arg(long)]
    pub rrf_k: Option<f64>,

    /// Print hits as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    /// Fusion parameters: flags over config values.
    pub fn fusion_params(&self, config: &TracklistConfig) -> FusionParams {
        let base = config.search.fusion_params();
        FusionParams {
            sparse_weight: self.sparse_weight.unwrap_or(base.sparse_weight),
            dense_weight: self.dense_weight.unwrap_or(base.dense_weight),
            k: self.rrf_k.unwrap_or(base.k),
        }
    }

    pub fn strategy<'a>(&'a self, config: &'a TracklistConfig) -> &'a str {
        self.strategy
            .as_deref()
            .unwrap_or(&config.search.default_strategy)
    }

    pub fn limit(&self, config: &TracklistConfig) -> usize {
        self.limit.unwrap_or(config.search.default_limit)
    }

    /// Resolve the fusion strategy of a hybrid search up front.
    pub fn check_strategy(&self, config: &TracklistConfig) -> Result<()> {
        if self.mode == ModeArg::Hybrid {
            FusionStrategy::from_name(self.strategy(config), &self.fusion_params(config))?;
        }
        Ok(())
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TRACKLIST_CONFIG env var > ~/.tracklist/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("TRACKLIST_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Apply flag and env overrides onto a loaded config.
    pub fn apply_overrides(&self, config: &mut TracklistConfig) {
        if let Some(dir) = pick(
            self.data_dir.as_ref().map(|p| p.to_string_lossy().to_string()),
            env_var("TRACKLIST_DATA_DIR"),
        ) {
            config.general.data_dir = dir;
        }
        if let Some(collection) = pick(self.collection.clone(), env_var("TRACKLIST_COLLECTION")) {
            config.store.collection = collection;
        }
        if let Some(level) = pick(self.log_level.clone(), env_var("TRACKLIST_LOG")) {
            config.general.log_level = level;
        }
    }
}

/// First present of flag and env value. Blank env values count as absent.
fn pick(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.or_else(|| env.filter(|v| !v.trim().is_empty()))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".tracklist").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".tracklist").join("config.toml");
    }
    PathBuf::from("config.toml")
}
