//! Collection lifecycle for the song collection.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::schema::{CollectionSchema, IndexSpec};
use tracklist_core::types::{fields, FieldValue, InsertAck, RawDocument};
use tracklist_storage::{CollectionDescription, QueryFilter, Store};

use crate::pipeline::IngestionPipeline;

/// Every distinct `episode_id` stored in `collection` (full scan).
pub fn fetch_episode_ids(store: &dyn Store, collection: &str) -> Result<BTreeSet<String>> {
    let rows = store.query(collection, &QueryFilter::All, &[fields::EPISODE_ID])?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get(fields::EPISODE_ID).and_then(FieldValue::as_text))
        .map(str::to_string)
        .collect())
}

/// Creates, inspects and drops collections using one schema and index spec.
pub struct CollectionManager {
    store: Arc<dyn Store>,
    schema: CollectionSchema,
    indexes: IndexSpec,
}

impl CollectionManager {
    pub fn new(store: Arc<dyn Store>, schema: CollectionSchema, indexes: IndexSpec) -> Self {
        Self {
            store,
            schema,
            indexes,
        }
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn indexes(&self) -> &IndexSpec {
        &self.indexes
    }

    pub fn has_collection(&self, name: &str) -> Result<bool> {
        self.store.has_collection(name)
    }

    /// Create the collection with its indexes.
    ///
    /// Fails with `CollectionAlreadyExists` if it is already present.
    pub fn create_collection(&self, name: &str) -> Result<()> {
        if self.store.has_collection(name)? {
            return Err(TracklistError::collection_already_exists(name));
        }
        self.store.create_collection(name, &self.schema, &self.indexes)?;
        info!(collection = name, "Created collection");
        Ok(())
    }

    /// Create the collection unless it exists. Returns whether it was created.
    pub fn create_collection_if_not_exists(&self, name: &str) -> Result<bool> {
        if self.store.has_collection(name)? {
            info!(collection = name, "Collection already exists");
            return Ok(false);
        }
        self.create_collection(name)?;
        Ok(true)
    }

    /// Create the collection and insert every well-formed document, without
    /// deduplication.
    pub async fn create_and_load_collection(
        &self,
        name: &str,
        pipeline: &IngestionPipeline,
        documents: &[RawDocument],
    ) -> Result<InsertAck> {
        self.create_collection(name)?;
        let ack = pipeline.load_all(name, documents).await?;
        info!(
            collection = name,
            inserted = ack.insert_count,
            "Created and loaded collection"
        );
        Ok(ack)
    }

    /// Drop the collection. A missing collection is logged, not an error.
    /// Returns whether anything was dropped.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        if !self.store.has_collection(name)? {
            warn!(collection = name, "Collection does not exist, nothing to delete");
            return Ok(false);
        }
        self.store.drop_collection(name)?;
        info!(collection = name, "Deleted collection");
        Ok(true)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.store.list_collections()
    }

    /// Schema, index spec, creation time and row count.
    pub fn get_collection_stats(&self, name: &str) -> Result<CollectionDescription> {
        self.store.describe_collection(name)
    }

    /// Sorted distinct episode ids in the collection.
    pub fn list_episodes(&self, name: &str) -> Result<Vec<String>> {
        if !self.store.has_collection(name)? {
            return Err(TracklistError::collection_not_found(name));
        }
        Ok(fetch_episode_ids(self.store.as_ref(), name)?
            .into_iter()
            .collect())
    }
}
