//! Tracklist ingestion pipeline.
//!
//! `IngestionPipeline::insert_new` inserts documents at most once per
//! `episode_id`: it lists the episodes already stored, filters the batch
//! against them, then embeds and inserts what is left in one batch.
//!
//! The list-then-insert sequence is not transactional. Two concurrent runs
//! over the same new episode can both insert it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::types::{Entity, InsertAck, RawDocument, Song, DEFAULT_QUERY_PREFIX};
use tracklist_storage::Store;

use crate::collection::fetch_episode_ids;
use crate::embedding::{check_batch, DynEmbeddingService};

/// Documents left out of an ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipSummary {
    /// No usable `episode_id`.
    pub missing: usize,
    /// Episode already stored.
    pub duplicate: usize,
}

impl SkipSummary {
    pub fn total(&self) -> usize {
        self.missing + self.duplicate
    }
}

/// Result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestResult {
    /// At least one document was stored.
    Inserted { ack: InsertAck, skipped: SkipSummary },
    /// Nothing new; the store was not written.
    NoOp { skipped: SkipSummary },
}

impl IngestResult {
    pub fn inserted(&self) -> usize {
        match self {
            IngestResult::Inserted { ack, .. } => ack.insert_count,
            IngestResult::NoOp { .. } => 0,
        }
    }

    pub fn skipped(&self) -> SkipSummary {
        match self {
            IngestResult::Inserted { skipped, .. } | IngestResult::NoOp { skipped } => *skipped,
        }
    }
}

/// Embeds and stores song documents.
pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn DynEmbeddingService>,
    query_prefix: String,
    dynamic_fields: bool,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            store,
            embedder,
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            dynamic_fields: true,
        }
    }

    /// Prefix prepended to the composite text before dense embedding.
    pub fn with_query_prefix(mut self, prefix: &str) -> Self {
        self.query_prefix = prefix.to_string();
        self
    }

    /// Whether undeclared attributes are stored in `$meta`. Must match the
    /// collection's `enable_dynamic_field`.
    pub fn with_dynamic_fields(mut self, enabled: bool) -> Self {
        self.dynamic_fields = enabled;
        self
    }

    /// Insert the documents whose episode is not stored yet.
    ///
    /// Documents without an `episode_id` and documents of already stored
    /// episodes are skipped and counted. Several songs of the same new
    /// episode in one batch are all inserted.
    pub async fn insert_new(
        &self,
        collection: &str,
        documents: &[RawDocument],
    ) -> Result<IngestResult> {
        if !self.store.has_collection(collection)? {
            error!(collection, "Cannot ingest into missing collection");
            return Err(TracklistError::collection_not_found(collection));
        }

        let existing = fetch_episode_ids(self.store.as_ref(), collection)?;
        debug!(
            collection,
            stored_episodes = existing.len(),
            "Loaded stored episode ids"
        );

        let mut skipped = SkipSummary::default();
        let mut to_insert = Vec::with_capacity(documents.len());
        for doc in documents {
            match Song::from_raw(doc) {
                Ok(song) if existing.contains(&song.episode_id) => skipped.duplicate += 1,
                Ok(song) => to_insert.push(song),
                Err(TracklistError::MalformedDocument(reason)) => {
                    warn!(%reason, "Skipping document");
                    skipped.missing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if to_insert.is_empty() {
            info!(
                collection,
                missing = skipped.missing,
                duplicate = skipped.duplicate,
                "No new episodes to insert"
            );
            return Ok(IngestResult::NoOp { skipped });
        }

        let ack = self.embed_and_insert(collection, &to_insert).await?;
        info!(
            collection,
            inserted = ack.insert_count,
            missing = skipped.missing,
            duplicate = skipped.duplicate,
            "Inserted new episodes"
        );
        Ok(IngestResult::Inserted { ack, skipped })
    }

    /// Insert every well-formed document without checking stored episodes.
    pub async fn load_all(&self, collection: &str, documents: &[RawDocument]) -> Result<InsertAck> {
        let mut songs = Vec::with_capacity(documents.len());
        for doc in documents {
            match Song::from_raw(doc) {
                Ok(song) => songs.push(song),
                Err(TracklistError::MalformedDocument(reason)) => {
                    warn!(%reason, "Skipping document");
                }
                Err(e) => return Err(e),
            }
        }
        if songs.is_empty() {
            return Ok(InsertAck {
                insert_count: 0,
                ids: Vec::new(),
            });
        }
        self.embed_and_insert(collection, &songs).await
    }

    /// Build composite texts, embed them in one call, and insert atomically.
    async fn embed_and_insert(&self, collection: &str, songs: &[Song]) -> Result<InsertAck> {
        let texts: Vec<String> = songs.iter().map(Song::composite_text).collect();
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", self.query_prefix, t))
            .collect();

        let vectors = match self.embedder.embed_batch_boxed(&inputs).await {
            Ok(v) => v,
            Err(e) => {
                error!(collection, error = %e, "Embedding failed, nothing inserted");
                return Err(e);
            }
        };
        check_batch(&vectors, songs.len(), self.embedder.dimensions())?;

        let entities: Vec<Entity> = songs
            .iter()
            .zip(texts)
            .zip(vectors)
            .map(|((song, text), dense)| song.to_entity(text, dense, self.dynamic_fields))
            .collect();

        self.store.insert(collection, &entities).map_err(|e| {
            error!(collection, error = %e, "Store insert failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionManager;
    use crate::embedding::{EmbeddingService, MockEmbedding};
    use crate::schema::{define_indexes, define_schema};
    use serde_json::json;
    use tracklist_core::config::IndexConfig;
    use tracklist_core::types::{fields, FieldValue};
    use tracklist_storage::{QueryFilter, SqliteStore};

    const DIM: usize = 8;
    const COLLECTION: &str = "asot_songs";

    fn doc(value: serde_json::Value) -> RawDocument {
        value.as_object().cloned().unwrap()
    }

    fn make_pipeline() -> (Arc<SqliteStore>, IngestionPipeline) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let manager = CollectionManager::new(
            store.clone(),
            define_schema(DIM, true, true),
            define_indexes(&IndexConfig::default()),
        );
        manager.create_collection(COLLECTION).unwrap();
        let pipeline =
            IngestionPipeline::new(store.clone(), Arc::new(MockEmbedding::with_dimensions(DIM)));
        (store, pipeline)
    }

    #[tokio::test]
    async fn test_insert_new_skips_missing_and_duplicates() {
        let (_, pipeline) = make_pipeline();
        let first = vec![
            doc(json!({"episode_id": "1000", "ranking": 1, "artist": "Armin van Buuren"})),
            doc(json!({"episode_id": "1000", "ranking": 2, "artist": "Tiesto"})),
            doc(json!({"title": "no episode"})),
        ];
        let result = pipeline.insert_new(COLLECTION, &first).await.unwrap();
        assert_eq!(result.inserted(), 2);
        assert_eq!(
            result.skipped(),
            SkipSummary {
                missing: 1,
                duplicate: 0
            }
        );

        let second = vec![
            doc(json!({"episode_id": "1000", "ranking": 3})),
            doc(json!({"episode_id": "1001", "ranking": 1})),
        ];
        let result = pipeline.insert_new(COLLECTION, &second).await.unwrap();
        assert_eq!(result.inserted(), 1);
        assert_eq!(result.skipped().duplicate, 1);
    }

    #[tokio::test]
    async fn test_insert_new_noop_when_nothing_new() {
        let (store, pipeline) = make_pipeline();
        let docs = vec![doc(json!({"episode_id": "1000"}))];
        pipeline.insert_new(COLLECTION, &docs).await.unwrap();

        let result = pipeline.insert_new(COLLECTION, &docs).await.unwrap();
        assert!(matches!(result, IngestResult::NoOp { skipped } if skipped.duplicate == 1));
        assert_eq!(store.describe_collection(COLLECTION).unwrap().row_count, 1);

        let result = pipeline.insert_new(COLLECTION, &[]).await.unwrap();
        assert_eq!(result, IngestResult::NoOp { skipped: SkipSummary::default() });
    }

    #[tokio::test]
    async fn test_insert_new_missing_collection() {
        let (_, pipeline) = make_pipeline();
        let docs = vec![doc(json!({"episode_id": "1000"}))];
        assert!(matches!(
            pipeline.insert_new("other", &docs).await,
            Err(TracklistError::CollectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stored_record_has_sentinels_and_composite_text() {
        let (store, pipeline) = make_pipeline();
        let docs = vec![doc(json!({
            "episode_id": "A",
            "ranking": 1,
            "artist": "Artist",
            "title": "Song1",
            "vote_count": 42,
            "label": "Armada"
        }))];
        pipeline.insert_new(COLLECTION, &docs).await.unwrap();

        let rows = store
            .query(
                COLLECTION,
                &QueryFilter::All,
                &[
                    fields::TEXT,
                    fields::COLLABORATORS,
                    fields::POPULARITY_SCORE,
                    fields::META,
                    fields::DENSE,
                ],
            )
            .unwrap();
        let row = &rows[0];
        assert_eq!(
            row.get(fields::TEXT),
            Some(&FieldValue::Text("A 1 Artist Song1 42".to_string()))
        );
        assert_eq!(
            row.get(fields::COLLABORATORS),
            Some(&FieldValue::Text("nav".to_string()))
        );
        assert_eq!(row.get(fields::POPULARITY_SCORE), Some(&FieldValue::Int(-1)));
        assert_eq!(
            row.get(fields::META),
            Some(&FieldValue::Json(json!({"label": "Armada"})))
        );

        let expected = MockEmbedding::with_dimensions(DIM)
            .embed("query: A 1 Artist Song1 42")
            .await
            .unwrap();
        assert_eq!(row.get(fields::DENSE), Some(&FieldValue::Vector(expected)));
    }

    #[tokio::test]
    async fn test_load_all_does_not_dedup() {
        let (store, pipeline) = make_pipeline();
        let docs = vec![doc(json!({"episode_id": "1000"})), doc(json!({"ranking": 2}))];
        pipeline.load_all(COLLECTION, &docs).await.unwrap();
        let ack = pipeline.load_all(COLLECTION, &docs).await.unwrap();
        assert_eq!(ack.insert_count, 1);
        assert_eq!(store.describe_collection(COLLECTION).unwrap().row_count, 2);
    }

    #[tokio::test]
    async fn test_store_rejects_wrong_dimension() {
        let (store, _) = make_pipeline();
        let pipeline =
            IngestionPipeline::new(store.clone(), Arc::new(MockEmbedding::with_dimensions(DIM + 1)));
        let docs = vec![doc(json!({"episode_id": "1000"}))];
        let err = pipeline.insert_new(COLLECTION, &docs).await.unwrap_err();
        assert!(matches!(err, TracklistError::StoreWrite(_)));
        assert_eq!(store.describe_collection(COLLECTION).unwrap().row_count, 0);
    }
}
