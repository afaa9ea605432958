//! The store abstraction: collections, batch insert, scalar query, and
//! dense/lexical/hybrid search.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tracklist_core::error::Result;
use tracklist_core::fusion::{Fusion, RankedHit};
use tracklist_core::schema::{CollectionSchema, IndexSpec, MetricType};
use tracklist_core::types::{Entity, FieldValue, InsertAck};

/// Query payload of one search request.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryData {
    /// A query vector for a dense field.
    Dense(Vec<f32>),
    /// Raw text for a field populated by a BM25 function.
    Text(String),
}

/// One search request against one vector field.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnRequest {
    pub field: String,
    pub data: QueryData,
    pub metric: MetricType,
    pub limit: usize,
}

impl AnnRequest {
    pub fn dense(field: &str, vector: Vec<f32>, metric: MetricType, limit: usize) -> Self {
        Self {
            field: field.to_string(),
            data: QueryData::Dense(vector),
            metric,
            limit,
        }
    }

    /// Full-text request scored by BM25.
    pub fn text(field: &str, text: &str, limit: usize) -> Self {
        Self {
            field: field.to_string(),
            data: QueryData::Text(text.to_string()),
            metric: MetricType::Bm25,
            limit,
        }
    }
}

/// Scalar filter for [`Store::query`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryFilter {
    All,
    Equals { field: String, value: FieldValue },
}

/// One search hit: primary key, score (higher is better) and requested fields.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreHit {
    pub id: i64,
    pub score: f64,
    pub entity: Entity,
}

/// Collection metadata and size.
#[derive(Clone, Debug, Serialize)]
pub struct CollectionDescription {
    pub name: String,
    pub schema: CollectionSchema,
    pub indexes: IndexSpec,
    pub created_at: DateTime<Utc>,
    pub row_count: u64,
}

/// A collection store.
///
/// Operations on a missing collection fail with `CollectionNotFound`.
/// `output_fields` name the fields copied into returned entities; the primary
/// key is always included.
pub trait Store: Send + Sync {
    fn has_collection(&self, name: &str) -> Result<bool>;

    /// Names of all collections, sorted.
    fn list_collections(&self) -> Result<Vec<String>>;

    /// Validate and create. Fails with `CollectionAlreadyExists` if present.
    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        indexes: &IndexSpec,
    ) -> Result<()>;

    fn drop_collection(&self, name: &str) -> Result<()>;

    fn describe_collection(&self, name: &str) -> Result<CollectionDescription>;

    /// Insert all entities atomically; either every row lands or none does.
    fn insert(&self, name: &str, entities: &[Entity]) -> Result<InsertAck>;

    /// Rows matching `filter`, in primary key order.
    fn query(&self, name: &str, filter: &QueryFilter, output_fields: &[&str])
        -> Result<Vec<Entity>>;

    /// Top `request.limit` hits for one request, best first.
    fn search(&self, name: &str, request: &AnnRequest, output_fields: &[&str])
        -> Result<Vec<StoreHit>>;

    /// Run every request independently and fuse the ranked lists.
    ///
    /// Fused hits carry the fused score and the entity from the first list
    /// that returned them.
    fn hybrid_search(
        &self,
        name: &str,
        requests: &[AnnRequest],
        fusion: &dyn Fusion,
        limit: usize,
        output_fields: &[&str],
    ) -> Result<Vec<StoreHit>> {
        let mut entities: HashMap<i64, Entity> = HashMap::new();
        let mut lists: Vec<Vec<RankedHit>> = Vec::with_capacity(requests.len());

        for request in requests {
            let hits = self.search(name, request, output_fields)?;
            lists.push(hits.iter().map(|h| RankedHit::new(h.id, h.score)).collect());
            for hit in hits {
                entities.entry(hit.id).or_insert(hit.entity);
            }
        }

        let views: Vec<&[RankedHit]> = lists.iter().map(Vec::as_slice).collect();
        let fused = fusion.fuse(&views, limit)?;

        Ok(fused
            .into_iter()
            .map(|hit| StoreHit {
                id: hit.id,
                score: hit.score,
                entity: entities.remove(&hit.id).unwrap_or_default(),
            })
            .collect())
    }
}
