//! Schema and index declarations for the song collection.

use std::collections::BTreeMap;

use serde_json::json;

use tracklist_core::config::IndexConfig;
use tracklist_core::schema::{
    CollectionSchema, FieldSchema, FunctionSchema, IndexParams, IndexSpec, MetricType,
};
use tracklist_core::types::{
    fields, AttributeKind, EPISODE_ID_MAX_LENGTH, SONG_ATTRIBUTES, TEXT_MAX_LENGTH,
};

/// Name of the BM25 function deriving `sparse` from `text`.
pub const BM25_FUNCTION: &str = "text_bm25_emb";
pub const DENSE_INDEX: &str = "dense_index";
pub const SPARSE_INDEX: &str = "sparse_index";

/// Declare the song collection: primary key, `episode_id`, each descriptive
/// attribute in declared order, the analyzed composite `text`, the derived
/// `sparse` field and the `dense` embedding of `dimension` floats.
pub fn define_schema(dimension: usize, auto_id: bool, enable_dynamic_field: bool) -> CollectionSchema {
    let mut schema = CollectionSchema::new(auto_id, enable_dynamic_field);
    schema
        .add_field(FieldSchema::primary_key(fields::ID, auto_id))
        .add_field(FieldSchema::varchar(fields::EPISODE_ID, EPISODE_ID_MAX_LENGTH));

    for attr in SONG_ATTRIBUTES.iter() {
        let field = match attr.kind {
            AttributeKind::Text { max_length } => FieldSchema::varchar(attr.name, max_length),
            AttributeKind::Int => FieldSchema::int64(attr.name),
        };
        schema.add_field(field);
    }

    schema
        .add_field(FieldSchema::varchar(fields::TEXT, TEXT_MAX_LENGTH).with_analyzer())
        .add_field(FieldSchema::sparse_float_vector(fields::SPARSE))
        .add_field(FieldSchema::float_vector(fields::DENSE, dimension))
        .add_function(FunctionSchema::bm25(BM25_FUNCTION, fields::TEXT, fields::SPARSE));
    schema
}

/// Declare the dense and lexical indexes from configuration.
pub fn define_indexes(config: &IndexConfig) -> IndexSpec {
    let mut spec = IndexSpec::new();
    spec.add_index(IndexParams {
        field_name: fields::DENSE.to_string(),
        index_name: DENSE_INDEX.to_string(),
        index_type: config.dense_index_kind,
        metric_type: config.dense_metric,
        params: BTreeMap::from([("nlist".to_string(), json!(config.dense_nlist))]),
    })
    .add_index(IndexParams {
        field_name: fields::SPARSE.to_string(),
        index_name: SPARSE_INDEX.to_string(),
        index_type: config.lexical_index_kind,
        metric_type: MetricType::Bm25,
        params: BTreeMap::from([(
            "inverted_index_algo".to_string(),
            json!(config.lexical_scoring_algorithm),
        )]),
    });
    spec
}
