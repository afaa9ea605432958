//! Embedded [`Store`] backed by SQLite.
//!
//! Layout per collection `c`:
//!
//! - table `c`: one column per declared scalar/dense field, dense vectors as
//!   `f32` blobs, plus a JSON `$meta` column when dynamic fields are enabled;
//! - FTS5 table `c__<sparse>` for each BM25-populated sparse field, kept in
//!   sync by an insert trigger;
//! - a row in the `collections` catalog with the schema and index spec.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::schema::{CollectionSchema, DataType, FieldSchema, IndexSpec};
use tracklist_core::types::{fields, Entity, FieldValue, InsertAck};

use crate::db::Database;
use crate::dense;
use crate::lexical::{fts_ddl, fts_table_name, quote_ident, sanitize_fts5_query};
use crate::migrations::RESERVED_TABLES;
use crate::store::{AnnRequest, CollectionDescription, QueryData, QueryFilter, Store, StoreHit};

const MAX_NAME_LENGTH: usize = 255;

/// SQLite-backed collection store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

struct CollectionMeta {
    schema: CollectionSchema,
    indexes: IndexSpec,
    created_at: i64,
}

impl CollectionMeta {
    fn primary_key(&self) -> Result<&FieldSchema> {
        self.schema
            .primary_field()
            .ok_or_else(|| TracklistError::StoreQuery("collection has no primary key".to_string()))
    }
}

/// How a selected column is decoded.
#[derive(Clone, Copy, Debug, PartialEq)]
enum ColumnKind {
    Int,
    Text,
    Vector,
    Json,
}

struct OutputColumn {
    name: String,
    kind: ColumnKind,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open (or create) a store backed by the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::new(path)?)))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }
}

// =============================================================================
// Store implementation
// =============================================================================

impl Store for SqliteStore {
    fn has_collection(&self, name: &str) -> Result<bool> {
        self.db.with_conn(|conn| catalog_contains(conn, name))
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM collections ORDER BY name")
                .map_err(query_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(query_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(query_err)?;
            Ok(names)
        })
    }

    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        indexes: &IndexSpec,
    ) -> Result<()> {
        validate_name("collection", name)?;
        if name.contains("__") {
            return Err(TracklistError::Schema(format!(
                "collection name {} may not contain a double underscore",
                name
            )));
        }
        schema.validate()?;
        for field in &schema.fields {
            validate_name("field", &field.name)?;
        }
        indexes.validate_against(schema)?;

        let ddl = collection_ddl(name, schema)?;
        let schema_json = serde_json::to_string(schema).map_err(write_err)?;
        let index_json = serde_json::to_string(indexes).map_err(write_err)?;

        self.db.with_conn(|conn| {
            if catalog_contains(conn, name)? {
                return Err(TracklistError::collection_already_exists(name));
            }

            let tx = conn.unchecked_transaction().map_err(write_err)?;
            tx.execute_batch(&ddl).map_err(|e| {
                TracklistError::StoreWrite(format!("Failed to create collection {}: {}", name, e))
            })?;
            tx.execute(
                "INSERT INTO collections (name, schema_json, index_json) VALUES (?1, ?2, ?3)",
                params![name, schema_json, index_json],
            )
            .map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            info!(
                collection = name,
                fields = schema.fields.len(),
                indexes = indexes.indexes.len(),
                "Collection created"
            );
            Ok(())
        })
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let meta = load_meta(conn, name)?;

            let tx = conn.unchecked_transaction().map_err(write_err)?;
            for function in &meta.schema.functions {
                for output in &function.output_field_names {
                    tx.execute_batch(&format!(
                        "DROP TABLE IF EXISTS {};",
                        quote_ident(&fts_table_name(name, output))
                    ))
                    .map_err(write_err)?;
                }
            }
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(name)))
                .map_err(write_err)?;
            tx.execute("DELETE FROM collections WHERE name = ?1", params![name])
                .map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            info!(collection = name, "Collection dropped");
            Ok(())
        })
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescription> {
        self.db.with_conn(|conn| {
            let meta = load_meta(conn, name)?;
            let row_count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
                    [],
                    |row| row.get(0),
                )
                .map_err(query_err)?;

            Ok(CollectionDescription {
                name: name.to_string(),
                created_at: Utc
                    .timestamp_opt(meta.created_at, 0)
                    .single()
                    .unwrap_or_default(),
                schema: meta.schema,
                indexes: meta.indexes,
                row_count: row_count.max(0) as u64,
            })
        })
    }

    fn insert(&self, name: &str, entities: &[Entity]) -> Result<InsertAck> {
        self.db.with_conn(|conn| {
            let meta = load_meta(conn, name)?;
            if entities.is_empty() {
                return Ok(InsertAck {
                    insert_count: 0,
                    ids: Vec::new(),
                });
            }

            let pk = meta.primary_key()?.clone();
            let columns: Vec<&FieldSchema> = meta.schema.input_fields().collect();
            let dynamic = meta.schema.enable_dynamic_field;

            let mut names: Vec<String> = columns.iter().map(|f| quote_ident(&f.name)).collect();
            if dynamic {
                names.push(quote_ident(fields::META));
            }
            let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(name),
                names.join(", "),
                placeholders.join(", ")
            );

            let rows = entities
                .iter()
                .map(|entity| entity_row(&meta.schema, &columns, entity))
                .collect::<Result<Vec<_>>>()?;

            let tx = conn.unchecked_transaction().map_err(write_err)?;
            let mut ids = Vec::with_capacity(rows.len());
            {
                let mut stmt = tx.prepare(&sql).map_err(write_err)?;
                for (values, entity) in rows.iter().zip(entities) {
                    stmt.execute(rusqlite::params_from_iter(values.iter()))
                        .map_err(write_err)?;
                    let id = if pk.auto_id {
                        tx.last_insert_rowid()
                    } else {
                        entity
                            .get(&pk.name)
                            .and_then(FieldValue::as_int)
                            .ok_or_else(|| {
                                TracklistError::StoreWrite(format!("missing field {}", pk.name))
                            })?
                    };
                    ids.push(id);
                }
            }
            tx.commit().map_err(write_err)?;

            debug!(collection = name, rows = ids.len(), "Inserted entities");
            Ok(InsertAck {
                insert_count: ids.len(),
                ids,
            })
        })
    }

    fn query(
        &self,
        name: &str,
        filter: &QueryFilter,
        output_fields: &[&str],
    ) -> Result<Vec<Entity>> {
        self.db.with_conn(|conn| {
            let meta = load_meta(conn, name)?;
            let pk = meta.primary_key()?.name.clone();
            let columns = output_columns(&meta.schema, output_fields)?;

            let mut sql = format!(
                "SELECT {} FROM {} AS t",
                select_list(&pk, &columns),
                quote_ident(name)
            );
            let mut bind: Vec<SqlValue> = Vec::new();
            if let QueryFilter::Equals { field, value } = filter {
                let declared = meta.schema.field(field).ok_or_else(|| {
                    TracklistError::StoreQuery(format!("unknown filter field {}", field))
                })?;
                bind.push(scalar_value(declared, value)?);
                sql.push_str(&format!(" WHERE t.{} = ?1", quote_ident(field)));
            }
            sql.push_str(&format!(" ORDER BY t.{}", quote_ident(&pk)));

            let mut stmt = conn.prepare(&sql).map_err(query_err)?;
            let mut rows = stmt
                .query(rusqlite::params_from_iter(bind.iter()))
                .map_err(query_err)?;

            let mut entities = Vec::new();
            while let Some(row) = rows.next().map_err(query_err)? {
                let (_, entity) = read_entity(row, &pk, &columns, 0)?;
                entities.push(entity);
            }
            Ok(entities)
        })
    }

    fn search(
        &self,
        name: &str,
        request: &AnnRequest,
        output_fields: &[&str],
    ) -> Result<Vec<StoreHit>> {
        self.db.with_conn(|conn| {
            let meta = load_meta(conn, name)?;
            let field = meta.schema.field(&request.field).ok_or_else(|| {
                TracklistError::StoreQuery(format!("unknown search field {}", request.field))
            })?;
            let index = meta.indexes.index_for(&field.name).ok_or_else(|| {
                TracklistError::StoreQuery(format!("field {} has no index", field.name))
            })?;
            if index.metric_type != request.metric {
                return Err(TracklistError::StoreQuery(format!(
                    "metric {} does not match index {} metric {}",
                    request.metric, index.index_name, index.metric_type
                )));
            }
            if request.limit == 0 {
                return Ok(Vec::new());
            }

            let pk = meta.primary_key()?.name.clone();
            let columns = output_columns(&meta.schema, output_fields)?;

            match (&field.data_type, &request.data) {
                (DataType::FloatVector, QueryData::Dense(vector)) => {
                    let dim = field.dim.unwrap_or_default();
                    if vector.len() != dim {
                        return Err(TracklistError::StoreQuery(format!(
                            "query vector has dimension {}, field {} expects {}",
                            vector.len(),
                            field.name,
                            dim
                        )));
                    }
                    dense_scan(conn, name, &pk, &field.name, &columns, request, vector)
                }
                (DataType::SparseFloatVector, QueryData::Text(text)) => {
                    let function = meta.schema.function_for_output(&field.name).ok_or_else(|| {
                        TracklistError::StoreQuery(format!(
                            "sparse field {} is not populated by a function",
                            field.name
                        ))
                    })?;
                    if function.input_field_names.is_empty() {
                        return Err(TracklistError::StoreQuery(format!(
                            "function {} has no input field",
                            function.name
                        )));
                    }
                    lexical_match(conn, name, &pk, &field.name, &columns, request, text)
                }
                _ => Err(TracklistError::StoreQuery(format!(
                    "request data does not fit field {} of type {:?}",
                    field.name, field.data_type
                ))),
            }
        })
    }
}

// =============================================================================
// Search execution
// =============================================================================

fn dense_scan(
    conn: &Connection,
    collection: &str,
    pk: &str,
    dense_field: &str,
    columns: &[OutputColumn],
    request: &AnnRequest,
    query: &[f32],
) -> Result<Vec<StoreHit>> {
    let sql = format!(
        "SELECT t.{}, {} FROM {} AS t ORDER BY t.{}",
        quote_ident(dense_field),
        select_list(pk, columns),
        quote_ident(collection),
        quote_ident(pk)
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let mut rows = stmt.query([]).map_err(query_err)?;

    let mut scored = Vec::new();
    while let Some(row) = rows.next().map_err(query_err)? {
        let blob: Vec<u8> = row.get(0).map_err(query_err)?;
        let candidate = dense::decode_vector(&blob)?;
        let score = dense::score(request.metric, query, &candidate)?;
        let (id, entity) = read_entity(row, pk, columns, 1)?;
        scored.push((score, (id, entity)));
    }

    Ok(dense::top_k(scored, request.limit)
        .into_iter()
        .map(|(score, (id, entity))| StoreHit { id, score, entity })
        .collect())
}

fn lexical_match(
    conn: &Connection,
    collection: &str,
    pk: &str,
    sparse_field: &str,
    columns: &[OutputColumn],
    request: &AnnRequest,
    text: &str,
) -> Result<Vec<StoreHit>> {
    let Some(match_expr) = sanitize_fts5_query(text) else {
        return Ok(Vec::new());
    };

    let fts = quote_ident(&fts_table_name(collection, sparse_field));
    let sql = format!(
        "SELECT bm25({fts}) AS score, {select}
         FROM {fts}
         JOIN {table} AS t ON t.{pk} = {fts}.rowid
         WHERE {fts} MATCH ?1
         ORDER BY score, t.{pk}
         LIMIT ?2",
        fts = fts,
        select = select_list(pk, columns),
        table = quote_ident(collection),
        pk = quote_ident(pk),
    );

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let mut rows = stmt
        .query(params![match_expr, request.limit as i64])
        .map_err(query_err)?;

    let mut hits = Vec::new();
    while let Some(row) = rows.next().map_err(query_err)? {
        let rank: f64 = row.get(0).map_err(query_err)?;
        let (id, entity) = read_entity(row, pk, columns, 1)?;
        // FTS5 bm25() is negative (lower = better), negate so higher is better.
        hits.push(StoreHit {
            id,
            score: -rank,
            entity,
        });
    }
    Ok(hits)
}

// =============================================================================
// Helpers
// =============================================================================

fn write_err(e: impl std::fmt::Display) -> TracklistError {
    TracklistError::StoreWrite(e.to_string())
}

fn query_err(e: impl std::fmt::Display) -> TracklistError {
    TracklistError::StoreQuery(e.to_string())
}

/// Names must be plain identifiers: `[A-Za-z_][A-Za-z0-9_]*`.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_NAME_LENGTH {
        return Err(TracklistError::Schema(format!(
            "invalid {} name {:?}: use letters, digits and underscores",
            kind, name
        )));
    }
    if kind == "collection"
        && (RESERVED_TABLES.contains(&name) || name.to_ascii_lowercase().starts_with("sqlite_"))
    {
        return Err(TracklistError::Schema(format!(
            "collection name {} is reserved",
            name
        )));
    }
    Ok(())
}

fn catalog_contains(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM collections WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_err)?;
    Ok(found.is_some())
}

fn load_meta(conn: &Connection, name: &str) -> Result<CollectionMeta> {
    let row = conn
        .query_row(
            "SELECT schema_json, index_json, created_at FROM collections WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(query_err)?;

    let (schema_json, index_json, created_at) =
        row.ok_or_else(|| TracklistError::collection_not_found(name))?;

    Ok(CollectionMeta {
        schema: serde_json::from_str(&schema_json)
            .map_err(|e| TracklistError::StoreQuery(format!("catalog schema of {}: {}", name, e)))?,
        indexes: serde_json::from_str(&index_json)
            .map_err(|e| TracklistError::StoreQuery(format!("catalog indexes of {}: {}", name, e)))?,
        created_at,
    })
}

fn collection_ddl(name: &str, schema: &CollectionSchema) -> Result<String> {
    let pk = schema
        .primary_field()
        .ok_or_else(|| TracklistError::Schema("no primary key".to_string()))?;

    let mut columns = Vec::new();
    for field in &schema.fields {
        let col = quote_ident(&field.name);
        let def = match field.data_type {
            DataType::Int64 if field.is_primary && field.auto_id => {
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", col)
            }
            DataType::Int64 if field.is_primary => format!("{} INTEGER PRIMARY KEY NOT NULL", col),
            DataType::Int64 => format!("{} INTEGER NOT NULL", col),
            DataType::VarChar => format!(
                "{col} TEXT NOT NULL CHECK (length({col}) <= {max})",
                col = col,
                max = field.max_length.unwrap_or_default()
            ),
            DataType::FloatVector => format!(
                "{col} BLOB NOT NULL CHECK (length({col}) = {bytes})",
                col = col,
                bytes = field.dim.unwrap_or_default() * 4
            ),
            DataType::SparseFloatVector => continue,
        };
        columns.push(def);
    }
    if schema.enable_dynamic_field {
        columns.push(format!("{} TEXT", quote_ident(fields::META)));
    }

    let mut ddl = format!(
        "CREATE TABLE {} (\n    {}\n);\n",
        quote_ident(name),
        columns.join(",\n    ")
    );
    for function in &schema.functions {
        if let (Some(input), Some(output)) = (
            function.input_field_names.first(),
            function.output_field_names.first(),
        ) {
            ddl.push_str(&fts_ddl(name, &pk.name, output, input));
            ddl.push('\n');
        }
    }
    Ok(ddl)
}

/// Convert one entity into column values for the insert statement.
fn entity_row(
    schema: &CollectionSchema,
    columns: &[&FieldSchema],
    entity: &Entity,
) -> Result<Vec<SqlValue>> {
    let mut meta = Map::new();

    for (key, value) in entity {
        if key == fields::META {
            match value {
                FieldValue::Json(Value::Object(map)) if schema.enable_dynamic_field => {
                    meta.extend(map.clone());
                }
                _ => {
                    return Err(TracklistError::StoreWrite(format!(
                        "{} must be a JSON object on a collection with dynamic fields",
                        fields::META
                    )))
                }
            }
            continue;
        }
        match schema.field(key) {
            Some(field) if field.is_primary && field.auto_id => {
                return Err(TracklistError::StoreWrite(format!(
                    "primary key {} is generated by the store",
                    key
                )))
            }
            Some(_) => {
                if let Some(function) = schema.function_for_output(key) {
                    return Err(TracklistError::StoreWrite(format!(
                        "field {} is populated by function {}",
                        key, function.name
                    )));
                }
            }
            None if schema.enable_dynamic_field => {
                meta.insert(key.clone(), serde_json::to_value(value).map_err(write_err)?);
            }
            None => {
                return Err(TracklistError::StoreWrite(format!(
                    "undeclared field {}",
                    key
                )))
            }
        }
    }

    let mut values = Vec::with_capacity(columns.len() + 1);
    for field in columns {
        let value = entity
            .get(&field.name)
            .ok_or_else(|| TracklistError::StoreWrite(format!("missing field {}", field.name)))?;
        values.push(field_value(field, value)?);
    }
    if schema.enable_dynamic_field {
        values.push(if meta.is_empty() {
            SqlValue::Null
        } else {
            SqlValue::Text(serde_json::to_string(&Value::Object(meta)).map_err(write_err)?)
        });
    }
    Ok(values)
}

fn field_value(field: &FieldSchema, value: &FieldValue) -> Result<SqlValue> {
    match (field.data_type, value) {
        (DataType::Int64, FieldValue::Int(v)) => Ok(SqlValue::Integer(*v)),
        (DataType::VarChar, FieldValue::Text(s)) => {
            let max = field.max_length.unwrap_or_default();
            let len = s.chars().count();
            if len > max {
                return Err(TracklistError::StoreWrite(format!(
                    "field {} has length {}, max is {}",
                    field.name, len, max
                )));
            }
            Ok(SqlValue::Text(s.clone()))
        }
        (DataType::FloatVector, FieldValue::Vector(v)) => {
            let dim = field.dim.unwrap_or_default();
            if v.len() != dim {
                return Err(TracklistError::StoreWrite(format!(
                    "field {} expects dimension {}, got {}",
                    field.name,
                    dim,
                    v.len()
                )));
            }
            Ok(SqlValue::Blob(dense::encode_vector(v)))
        }
        _ => Err(TracklistError::StoreWrite(format!(
            "field {} of type {:?} cannot hold {:?}",
            field.name, field.data_type, value
        ))),
    }
}

/// Bind value for a scalar filter.
fn scalar_value(field: &FieldSchema, value: &FieldValue) -> Result<SqlValue> {
    match (field.data_type, value) {
        (DataType::Int64, FieldValue::Int(v)) => Ok(SqlValue::Integer(*v)),
        (DataType::VarChar, FieldValue::Text(s)) => Ok(SqlValue::Text(s.clone())),
        _ => Err(TracklistError::StoreQuery(format!(
            "cannot filter field {} of type {:?} by {:?}",
            field.name, field.data_type, value
        ))),
    }
}

fn output_columns(schema: &CollectionSchema, output_fields: &[&str]) -> Result<Vec<OutputColumn>> {
    let pk = schema.primary_field().map(|f| f.name.as_str());
    let mut columns: Vec<OutputColumn> = Vec::new();

    for &name in output_fields {
        if Some(name) == pk || columns.iter().any(|c| c.name == name) {
            continue;
        }
        let kind = if name == fields::META {
            if !schema.enable_dynamic_field {
                return Err(TracklistError::StoreQuery(format!(
                    "{} requires dynamic fields",
                    fields::META
                )));
            }
            ColumnKind::Json
        } else {
            let field = schema.field(name).ok_or_else(|| {
                TracklistError::StoreQuery(format!("unknown output field {}", name))
            })?;
            match field.data_type {
                DataType::Int64 => ColumnKind::Int,
                DataType::VarChar => ColumnKind::Text,
                DataType::FloatVector => ColumnKind::Vector,
                DataType::SparseFloatVector => {
                    return Err(TracklistError::StoreQuery(format!(
                        "sparse field {} cannot be returned",
                        name
                    )))
                }
            }
        };
        columns.push(OutputColumn {
            name: name.to_string(),
            kind,
        });
    }
    Ok(columns)
}

fn select_list(pk: &str, columns: &[OutputColumn]) -> String {
    std::iter::once(format!("t.{}", quote_ident(pk)))
        .chain(columns.iter().map(|c| format!("t.{}", quote_ident(&c.name))))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read the primary key at `offset` followed by `columns`.
fn read_entity(
    row: &rusqlite::Row<'_>,
    pk: &str,
    columns: &[OutputColumn],
    offset: usize,
) -> Result<(i64, Entity)> {
    let id: i64 = row.get(offset).map_err(query_err)?;
    let mut entity = Entity::new();
    entity.insert(pk.to_string(), FieldValue::Int(id));

    for (i, column) in columns.iter().enumerate() {
        let raw: SqlValue = row.get(offset + 1 + i).map_err(query_err)?;
        let value = match (column.kind, raw) {
            (_, SqlValue::Null) => continue,
            (ColumnKind::Int, SqlValue::Integer(v)) => FieldValue::Int(v),
            (ColumnKind::Text, SqlValue::Text(s)) => FieldValue::Text(s),
            (ColumnKind::Vector, SqlValue::Blob(b)) => FieldValue::Vector(dense::decode_vector(&b)?),
            (ColumnKind::Json, SqlValue::Text(s)) => {
                FieldValue::Json(serde_json::from_str(&s).map_err(|e| {
                    TracklistError::StoreQuery(format!("column {}: {}", column.name, e))
                })?)
            }
            (kind, other) => {
                return Err(TracklistError::StoreQuery(format!(
                    "column {} holds {:?}, expected {:?}",
                    column.name,
                    other.data_type(),
                    kind
                )))
            }
        };
        entity.insert(column.name.clone(), value);
    }
    Ok((id, entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tracklist_core::schema::{FunctionSchema, IndexParams, IndexType, MetricType};

    fn make_schema(dynamic: bool) -> CollectionSchema {
        let mut schema = CollectionSchema::new(true, dynamic);
        schema
            .add_field(FieldSchema::primary_key("id", true))
            .add_field(FieldSchema::varchar("episode_id", 50))
            .add_field(FieldSchema::int64("ranking"))
            .add_field(FieldSchema::varchar("text", 1000).with_analyzer())
            .add_field(FieldSchema::sparse_float_vector("sparse"))
            .add_field(FieldSchema::float_vector("dense", 3))
            .add_function(FunctionSchema::bm25("text_bm25_emb", "text", "sparse"));
        schema
    }

    fn make_indexes() -> IndexSpec {
        let mut spec = IndexSpec::new();
        spec.add_index(IndexParams {
            field_name: "dense".to_string(),
            index_name: "dense_index".to_string(),
            index_type: IndexType::IvfFlat,
            metric_type: MetricType::Ip,
            params: BTreeMap::from([("nlist".to_string(), serde_json::json!(128))]),
        })
        .add_index(IndexParams {
            field_name: "sparse".to_string(),
            index_name: "sparse_index".to_string(),
            index_type: IndexType::SparseInvertedIndex,
            metric_type: MetricType::Bm25,
            params: BTreeMap::new(),
        });
        spec
    }

    fn make_entity(episode: &str, ranking: i64, text: &str, dense: [f32; 3]) -> Entity {
        let mut entity = Entity::new();
        entity.insert("episode_id".to_string(), FieldValue::Text(episode.to_string()));
        entity.insert("ranking".to_string(), FieldValue::Int(ranking));
        entity.insert("text".to_string(), FieldValue::Text(text.to_string()));
        entity.insert("dense".to_string(), FieldValue::Vector(dense.to_vec()));
        entity
    }

    fn make_store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_collection("songs", &make_schema(true), &make_indexes())
            .unwrap();
        store
    }

    fn seed(store: &SqliteStore) -> InsertAck {
        store
            .insert(
                "songs",
                &[
                    make_entity("1000", 1, "1000 1 Armin van Buuren Blah Blah Blah", [1.0, 0.0, 0.0]),
                    make_entity("1000", 2, "1000 2 Tiesto Adagio For Strings", [0.0, 1.0, 0.0]),
                    make_entity("1001", 1, "1001 1 Armin van Buuren Great Spirit", [0.6, 0.8, 0.0]),
                ],
            )
            .unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let store = make_store();
        assert!(store.has_collection("songs").unwrap());
        assert!(!store.has_collection("other").unwrap());
        assert_eq!(store.list_collections().unwrap(), vec!["songs"]);
    }

    #[test]
    fn test_create_twice_fails() {
        let store = make_store();
        let err = store
            .create_collection("songs", &make_schema(true), &make_indexes())
            .unwrap_err();
        assert!(matches!(err, TracklistError::CollectionAlreadyExists { name } if name == "songs"));
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let store = SqliteStore::in_memory().unwrap();
        for name in ["", "1songs", "so-ngs", "a__b", "collections", "sqlite_x"] {
            let err = store
                .create_collection(name, &make_schema(true), &make_indexes())
                .unwrap_err();
            assert!(matches!(err, TracklistError::Schema(_)), "name {:?}", name);
        }
        assert!(store.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_invalid_schema() {
        let store = SqliteStore::in_memory().unwrap();
        let mut schema = make_schema(false);
        schema.add_field(FieldSchema::primary_key("id2", false));
        let err = store
            .create_collection("songs", &schema, &make_indexes())
            .unwrap_err();
        assert!(matches!(err, TracklistError::Schema(_)));
        assert!(!store.has_collection("songs").unwrap());
    }

    #[test]
    fn test_insert_returns_monotonic_ids() {
        let store = make_store();
        let ack = seed(&store);
        assert_eq!(ack.insert_count, 3);
        assert_eq!(ack.ids.len(), 3);
        assert!(ack.ids.windows(2).all(|w| w[0] < w[1]));

        let ack = store
            .insert("songs", &[make_entity("1002", 1, "1002 1 x", [0.0, 0.0, 1.0])])
            .unwrap();
        assert!(ack.ids[0] > 3);
    }

    #[test]
    fn test_insert_empty_batch() {
        let store = make_store();
        let ack = store.insert("songs", &[]).unwrap();
        assert_eq!(ack.insert_count, 0);
        assert!(ack.ids.is_empty());
    }

    #[test]
    fn test_insert_missing_collection() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .insert("songs", &[make_entity("1", 1, "t", [0.0; 3])])
            .unwrap_err();
        assert!(matches!(err, TracklistError::CollectionNotFound { .. }));
    }

    #[test]
    fn test_insert_is_atomic() {
        let store = make_store();
        let mut bad = make_entity("1001", 1, "bad", [0.0; 3]);
        bad.insert("dense".to_string(), FieldValue::Vector(vec![1.0, 2.0]));

        let err = store
            .insert("songs", &[make_entity("1000", 1, "good", [1.0, 0.0, 0.0]), bad])
            .unwrap_err();
        assert!(matches!(err, TracklistError::StoreWrite(_)));
        assert_eq!(store.describe_collection("songs").unwrap().row_count, 0);
    }

    #[test]
    fn test_insert_rejects_function_output_and_auto_id() {
        let store = make_store();

        let mut with_sparse = make_entity("1000", 1, "t", [0.0; 3]);
        with_sparse.insert("sparse".to_string(), FieldValue::Vector(vec![1.0]));
        assert!(matches!(
            store.insert("songs", &[with_sparse]),
            Err(TracklistError::StoreWrite(_))
        ));

        let mut with_id = make_entity("1000", 1, "t", [0.0; 3]);
        with_id.insert("id".to_string(), FieldValue::Int(5));
        assert!(matches!(
            store.insert("songs", &[with_id]),
            Err(TracklistError::StoreWrite(_))
        ));
    }

    #[test]
    fn test_insert_rejects_overlong_varchar() {
        let store = make_store();
        let entity = make_entity(&"9".repeat(51), 1, "t", [0.0; 3]);
        assert!(matches!(
            store.insert("songs", &[entity]),
            Err(TracklistError::StoreWrite(_))
        ));
    }

    #[test]
    fn test_undeclared_field_without_dynamic() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_collection("strict", &make_schema(false), &make_indexes())
            .unwrap();
        let mut entity = make_entity("1000", 1, "t", [0.0; 3]);
        entity.insert("genre".to_string(), FieldValue::Text("trance".to_string()));
        assert!(matches!(
            store.insert("strict", &[entity]),
            Err(TracklistError::StoreWrite(_))
        ));
    }

    #[test]
    fn test_dynamic_fields_roundtrip() {
        let store = make_store();
        let mut entity = make_entity("1000", 1, "t", [0.0; 3]);
        entity.insert("genre".to_string(), FieldValue::Text("trance".to_string()));
        entity.insert(
            fields::META.to_string(),
            FieldValue::Json(serde_json::json!({"label": "Armada"})),
        );
        store.insert("songs", &[entity]).unwrap();

        let rows = store
            .query("songs", &QueryFilter::All, &["episode_id", fields::META])
            .unwrap();
        assert_eq!(
            rows[0].get(fields::META),
            Some(&FieldValue::Json(
                serde_json::json!({"genre": "trance", "label": "Armada"})
            ))
        );
    }

    #[test]
    fn test_query_all_and_equals() {
        let store = make_store();
        seed(&store);

        let rows = store
            .query("songs", &QueryFilter::All, &["episode_id"])
            .unwrap();
        let episodes: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("episode_id").and_then(FieldValue::as_text))
            .collect();
        assert_eq!(episodes, vec!["1000", "1000", "1001"]);
        assert!(rows[0].contains_key("id"));
        assert!(!rows[0].contains_key("text"));

        let rows = store
            .query(
                "songs",
                &QueryFilter::Equals {
                    field: "episode_id".to_string(),
                    value: FieldValue::Text("1001".to_string()),
                },
                &["ranking", "dense"],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ranking"), Some(&FieldValue::Int(1)));
        assert_eq!(
            rows[0].get("dense"),
            Some(&FieldValue::Vector(vec![0.6, 0.8, 0.0]))
        );
    }

    #[test]
    fn test_query_rejects_unknown_or_sparse_fields() {
        let store = make_store();
        assert!(store.query("songs", &QueryFilter::All, &["nope"]).is_err());
        assert!(store.query("songs", &QueryFilter::All, &["sparse"]).is_err());
    }

    #[test]
    fn test_dense_search_inner_product() {
        let store = make_store();
        seed(&store);

        let request = AnnRequest::dense("dense", vec![1.0, 0.0, 0.0], MetricType::Ip, 2);
        let hits = store.search("songs", &request, &["episode_id"]).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].id, 3);
        assert!((hits[1].score - 0.6).abs() < 1e-6);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_dense_search_wrong_dimension() {
        let store = make_store();
        let request = AnnRequest::dense("dense", vec![1.0, 0.0], MetricType::Ip, 2);
        assert!(matches!(
            store.search("songs", &request, &[]),
            Err(TracklistError::StoreQuery(_))
        ));
    }

    #[test]
    fn test_search_metric_mismatch() {
        let store = make_store();
        let request = AnnRequest::dense("dense", vec![1.0, 0.0, 0.0], MetricType::Cosine, 2);
        assert!(matches!(
            store.search("songs", &request, &[]),
            Err(TracklistError::StoreQuery(_))
        ));
    }

    #[test]
    fn test_lexical_search_ranks_by_bm25() {
        let store = make_store();
        seed(&store);

        let request = AnnRequest::text("sparse", "Blah blah", 10);
        let hits = store.search("songs", &request, &["episode_id", "text"]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].score > 0.0);

        let request = AnnRequest::text("sparse", "armin spirit", 10);
        let hits = store.search("songs", &request, &["episode_id"]).unwrap();
        assert_eq!(hits.len(), 2);
        // Matches both terms.
        assert_eq!(hits[0].id, 3);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_lexical_search_without_terms() {
        let store = make_store();
        seed(&store);
        let request = AnnRequest::text("sparse", " -- () ", 10);
        assert!(store.search("songs", &request, &[]).unwrap().is_empty());

        let request = AnnRequest::text("sparse", "nonexistent", 10);
        assert!(store.search("songs", &request, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_search_missing_collection() {
        let store = SqliteStore::in_memory().unwrap();
        let request = AnnRequest::text("sparse", "armin", 5);
        assert!(matches!(
            store.search("songs", &request, &[]),
            Err(TracklistError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn test_describe_collection() {
        let store = make_store();
        seed(&store);
        let description = store.describe_collection("songs").unwrap();
        assert_eq!(description.name, "songs");
        assert_eq!(description.row_count, 3);
        assert_eq!(description.schema, make_schema(true));
        assert_eq!(description.indexes, make_indexes());
        assert!(description.created_at.timestamp() > 0);
    }

    #[test]
    fn test_corrupt_catalog_row_is_query_error() {
        let store = make_store();
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE collections SET schema_json = '{' WHERE name = 'songs'",
                    [],
                )
                .map_err(write_err)?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            store.describe_collection("songs"),
            Err(TracklistError::StoreQuery(_))
        ));
    }

    #[test]
    fn test_corrupt_meta_column_is_query_error() {
        let store = make_store();
        seed(&store);
        store
            .db
            .with_conn(|conn| {
                conn.execute(r#"UPDATE "songs" SET "$meta" = '{' WHERE "id" = 1"#, [])
                    .map_err(write_err)?;
                Ok(())
            })
            .unwrap();

        let err = store
            .query("songs", &QueryFilter::All, &["episode_id", fields::META])
            .unwrap_err();
        assert!(matches!(err, TracklistError::StoreQuery(_)));
    }

    #[test]
    fn test_drop_collection() {
        let store = make_store();
        seed(&store);
        store.drop_collection("songs").unwrap();
        assert!(!store.has_collection("songs").unwrap());
        assert!(matches!(
            store.drop_collection("songs"),
            Err(TracklistError::CollectionNotFound { .. })
        ));

        // Recreating after a drop starts empty.
        store
            .create_collection("songs", &make_schema(true), &make_indexes())
            .unwrap();
        assert_eq!(store.describe_collection("songs").unwrap().row_count, 0);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracklist.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .create_collection("songs", &make_schema(true), &make_indexes())
                .unwrap();
            seed(&store);
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.describe_collection("songs").unwrap().row_count, 3);
        let hits = store
            .search("songs", &AnnRequest::text("sparse", "adagio", 5), &[])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }
}
