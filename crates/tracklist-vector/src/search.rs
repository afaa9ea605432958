//! Search engine over the song collection.
//!
//! Dense search embeds `query_prefix + query` and ranks by the dense metric.
//! Lexical search sends the raw query to the BM25 index. Hybrid search runs
//! both (lexical first) and fuses them with a named strategy. All three
//! return at most `limit` hits, best first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::fusion::{Fusion, FusionParams, FusionStrategy};
use tracklist_core::schema::MetricType;
use tracklist_core::types::{fields, SearchHit, Song, DEFAULT_QUERY_PREFIX, SONG_ATTRIBUTES};
use tracklist_storage::{AnnRequest, Store, StoreHit};

use crate::embedding::DynEmbeddingService;

/// Which retrieval path a search takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Dense,
    Lexical,
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Whether the query has to be embedded for this mode.
    pub fn needs_embedding(self) -> bool {
        !matches!(self, SearchMode::Lexical)
    }
}

/// Search engine combining the store with the embedding service.
///
/// Uses dynamic dispatch (`Arc<dyn DynEmbeddingService>`) so that production
/// code can supply `OnnxEmbeddingService` while tests use `MockEmbedding`.
pub struct SearchEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn DynEmbeddingService>,
    query_prefix: String,
    dense_metric: MetricType,
    dynamic_fields: bool,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            store,
            embedder,
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            dense_metric: MetricType::Ip,
            dynamic_fields: true,
        }
    }

    pub fn with_query_prefix(mut self, prefix: &str) -> Self {
        self.query_prefix = prefix.to_string();
        self
    }

    /// Metric of the collection's dense index.
    pub fn with_dense_metric(mut self, metric: MetricType) -> Self {
        self.dense_metric = metric;
        self
    }

    /// Return `$meta` attributes with each hit.
    pub fn with_dynamic_fields(mut self, enabled: bool) -> Self {
        self.dynamic_fields = enabled;
        self
    }

    /// Dense-only search by embedding similarity.
    pub async fn dense_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_collection(collection)?;
        let request = self.dense_request(query, limit).await?;
        let hits = self
            .store
            .search(collection, &request, &self.output_fields())?;
        debug!(collection, hits = hits.len(), "Dense search complete");
        to_search_hits(hits)
    }

    /// Lexical-only BM25 search. No embedding is computed.
    pub async fn lexical_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_collection(collection)?;
        let request = AnnRequest::text(fields::SPARSE, query, limit);
        let hits = self
            .store
            .search(collection, &request, &self.output_fields())?;
        debug!(collection, hits = hits.len(), "Lexical search complete");
        to_search_hits(hits)
    }

    /// Fused lexical + dense search.
    ///
    /// The strategy name is resolved before anything else, so an unknown name
    /// fails with `UnsupportedStrategy` without touching the store or the
    /// embedding service.
    pub async fn hybrid_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        strategy: &str,
        params: &FusionParams,
    ) -> Result<Vec<SearchHit>> {
        let fusion = FusionStrategy::from_name(strategy, params)?;
        self.ensure_collection(collection)?;

        let requests = vec![
            AnnRequest::text(fields::SPARSE, query, limit),
            self.dense_request(query, limit).await?,
        ];
        let hits = self.store.hybrid_search(
            collection,
            &requests,
            &fusion,
            limit,
            &self.output_fields(),
        )?;
        debug!(
            collection,
            strategy = fusion.name(),
            hits = hits.len(),
            "Hybrid search complete"
        );
        to_search_hits(hits)
    }

    /// Dispatch on `mode`. `strategy` and `params` apply to hybrid only.
    pub async fn search(
        &self,
        mode: SearchMode,
        collection: &str,
        query: &str,
        limit: usize,
        strategy: &str,
        params: &FusionParams,
    ) -> Result<Vec<SearchHit>> {
        match mode {
            SearchMode::Dense => self.dense_search(collection, query, limit).await,
            SearchMode::Lexical => self.lexical_search(collection, query, limit).await,
            SearchMode::Hybrid => {
                self.hybrid_search(collection, query, limit, strategy, params)
                    .await
            }
        }
    }

    fn ensure_collection(&self, collection: &str) -> Result<()> {
        if !self.store.has_collection(collection)? {
            error!(collection, "Search on missing collection");
            return Err(TracklistError::collection_not_found(collection));
        }
        Ok(())
    }

    async fn dense_request(&self, query: &str, limit: usize) -> Result<AnnRequest> {
        let input = vec![format!("{}{}", self.query_prefix, query)];
        let vector = self
            .embedder
            .embed_batch_boxed(&input)
            .await?
            .pop()
            .ok_or_else(|| TracklistError::Embedding("provider returned no vector".to_string()))?;
        Ok(AnnRequest::dense(fields::DENSE, vector, self.dense_metric, limit))
    }

    fn output_fields(&self) -> Vec<&'static str> {
        let mut out = vec![fields::EPISODE_ID];
        out.extend(SONG_ATTRIBUTES.iter().map(|a| a.name));
        if self.dynamic_fields {
            out.push(fields::META);
        }
        out
    }
}

fn to_search_hits(hits: Vec<StoreHit>) -> Result<Vec<SearchHit>> {
    hits.into_iter()
        .map(|hit| {
            Ok(SearchHit {
                id: hit.id,
                score: hit.score,
                song: Song::from_entity(&hit.entity)?,
            })
        })
        .collect()
}
