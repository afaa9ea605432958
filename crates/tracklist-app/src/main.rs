//! Tracklist application binary - composition root.
//!
//! 1. Load `.env`, parse CLI flags, load configuration from TOML
//! 2. Install tracing (stderr, plus a daily log file when enabled)
//! 3. Open the SQLite store and build the embedding backend
//! 4. Run one subcommand against the configured collection

mod cli;
mod output;

use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tracklist_core::config::{expand_home, EmbeddingConfig, GeneralConfig};
use tracklist_core::{Result, TracklistConfig, TracklistError};
use tracklist_storage::{SqliteStore, Store};
use tracklist_vector::{
    define_indexes, define_schema, fetch_episode_ids, CollectionManager, DynEmbeddingService,
    IngestResult, IngestionPipeline, MockEmbedding, OnnxEmbeddingService, SearchEngine,
    SearchMode,
};

use cli::{CliArgs, Command, SearchArgs};

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must live until exit.
fn init_tracing(general: &GeneralConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&general.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    if !general.log_to_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    }

    let log_dir = expand_home(&general.data_dir).join("logs");
    let appender = tracing_appender::rolling::daily(&log_dir, "tracklist.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    tracing::debug!(dir = %log_dir.display(), "File logging enabled");
    Some(guard)
}

/// Build the configured embedding backend and check its dimension.
fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    let embedder: Arc<dyn DynEmbeddingService> = match config.backend.as_str() {
        "onnx" => {
            let dir = expand_home(&config.model_dir);
            tracing::info!(model = %config.model, dir = %dir.display(), "Loading ONNX embedding model");
            Arc::new(OnnxEmbeddingService::from_directory(&dir, config.dimension)?)
        }
        "mock" => {
            tracing::warn!("Using mock embeddings; dense search results are not semantic");
            Arc::new(MockEmbedding::with_dimensions(config.dimension))
        }
        other => {
            return Err(TracklistError::Config(format!(
                "unknown embedding backend '{}' (expected onnx or mock)",
                other
            )))
        }
    };

    if embedder.dimensions() != config.dimension {
        return Err(TracklistError::Config(format!(
            "embedding model produces {} dimensions, config declares {}",
            embedder.dimensions(),
            config.dimension
        )));
    }
    Ok(embedder)
}

/// Shared handles for one command run.
struct App {
    config: TracklistConfig,
    store: Arc<dyn Store>,
    manager: CollectionManager,
}

impl App {
    fn open(config: TracklistConfig) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);
        tracing::info!(path = %db_path.display(), "SQLite store opened");

        let manager = CollectionManager::new(
            Arc::clone(&store),
            define_schema(
                config.embedding.dimension,
                config.schema.auto_id,
                config.schema.enable_dynamic_field,
            ),
            define_indexes(&config.index),
        );
        Ok(Self {
            config,
            store,
            manager,
        })
    }

    fn collection(&self) -> &str {
        &self.config.store.collection
    }

    fn pipeline(&self, embedder: Arc<dyn DynEmbeddingService>) -> IngestionPipeline {
        IngestionPipeline::new(Arc::clone(&self.store), embedder)
            .with_query_prefix(&self.config.embedding.query_prefix)
            .with_dynamic_fields(self.config.schema.enable_dynamic_field)
    }

    fn engine(&self, embedder: Arc<dyn DynEmbeddingService>) -> SearchEngine {
        SearchEngine::new(Arc::clone(&self.store), embedder)
            .with_query_prefix(&self.config.embedding.query_prefix)
            .with_dense_metric(self.config.index.dense_metric)
            .with_dynamic_fields(self.config.schema.enable_dynamic_field)
    }

    async fn run(&self, command: Command) -> Result<()> {
        let collection = self.collection();
        match command {
            Command::Create => {
                self.manager.create_collection(collection)?;
                println!("Created collection '{}'", collection);
            }
            Command::Drop => {
                if self.manager.delete_collection(collection)? {
                    println!("Dropped collection '{}'", collection);
                } else {
                    println!("Collection '{}' does not exist", collection);
                }
            }
            Command::Collections => {
                for name in self.manager.list_collections()? {
                    println!("{}", name);
                }
            }
            Command::Stats => {
                let stats = self.manager.get_collection_stats(collection)?;
                let episodes = self.manager.list_episodes(collection)?;
                println!("{}", output::render_stats(&stats, &episodes));
            }
            Command::Episodes => {
                for episode in self.manager.list_episodes(collection)? {
                    println!("{}", episode);
                }
            }
            Command::Ingest { path, create } => self.ingest(&path, create).await?,
            Command::Pending { urls_file } => self.pending(&urls_file)?,
            Command::Search(args) => self.search(&args).await?,
        }
        Ok(())
    }

    async fn ingest(&self, path: &Path, create: bool) -> Result<()> {
        let collection = self.collection();
        if create {
            self.manager.create_collection_if_not_exists(collection)?;
        }
        let documents = tracklist_source::load_documents(path)?;
        tracing::info!(path = %path.display(), documents = documents.len(), "Loaded documents");

        let pipeline = self.pipeline(build_embedder(&self.config.embedding)?);
        let result = pipeline.insert_new(collection, &documents).await?;
        let skipped = result.skipped();
        match result {
            IngestResult::Inserted { ack, .. } => println!(
                "Inserted {} songs ({} duplicate, {} without episode)",
                ack.insert_count, skipped.duplicate, skipped.missing
            ),
            IngestResult::NoOp { .. } => println!(
                "Nothing new to insert ({} duplicate, {} without episode)",
                skipped.duplicate, skipped.missing
            ),
        }
        Ok(())
    }

    fn pending(&self, urls_file: &Path) -> Result<()> {
        let collection = self.collection();
        let urls = tracklist_source::read_episode_urls(urls_file)?;
        let stored = if self.store.has_collection(collection)? {
            fetch_episode_ids(self.store.as_ref(), collection)?
        } else {
            BTreeSet::new()
        };
        let pending = tracklist_source::pending_episode_urls(&urls, &stored);
        tracing::info!(
            total = urls.len(),
            pending = pending.len(),
            "Checked episode URLs"
        );
        for url in pending {
            println!("{}", url);
        }
        Ok(())
    }

    async fn search(&self, args: &SearchArgs) -> Result<()> {
        let mode: SearchMode = args.mode.into();
        args.check_strategy(&self.config)?;

        let embedder: Arc<dyn DynEmbeddingService> = if mode.needs_embedding() {
            build_embedder(&self.config.embedding)?
        } else {
            // Lexical search never calls the embedder.
            Arc::new(MockEmbedding::with_dimensions(self.config.embedding.dimension))
        };
        let hits = self
            .engine(embedder)
            .search(
                mode,
                self.collection(),
                &args.query,
                args.limit(&self.config),
                args.strategy(&self.config),
                &args.fusion_params(&self.config),
            )
            .await?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        } else {
            println!("{}", output::render_hits(&hits));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let mut config = TracklistConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);

    let _guard = init_tracing(&config.general);
    tracing::debug!(path = %config_file.display(), "Configuration loaded");

    let result = async {
        config.search.validate()?;
        App::open(config)?.run(args.command).await
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
