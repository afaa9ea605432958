//! Tracklist Vector crate - embedding service, collection lifecycle,
//! ingestion pipeline and search engine.
//!
//! Songs are embedded with an ONNX sentence model (or a hash-based mock in
//! tests), stored through a `tracklist_storage::Store`, and retrieved by
//! dense, lexical or fused hybrid search.

pub mod collection;
pub mod embedding;
pub mod pipeline;
pub mod schema;
pub mod search;

pub use collection::{fetch_episode_ids, CollectionManager};
pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService,
};
pub use pipeline::{IngestResult, IngestionPipeline, SkipSummary};
pub use schema::{define_indexes, define_schema};
pub use search::{SearchEngine, SearchMode};
