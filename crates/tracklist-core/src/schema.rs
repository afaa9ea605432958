//! Collection schema and index declarations.
//!
//! These are pure descriptions. Nothing touches the store until a
//! [`CollectionSchema`] and [`IndexSpec`] are handed to a store's
//! `create_collection`, which calls [`CollectionSchema::validate`] and
//! [`IndexSpec::validate_against`] before creating anything.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracklistError};

// =============================================================================
// Fields
// =============================================================================

/// Storage type of a declared field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Int64,
    #[serde(rename = "VARCHAR")]
    VarChar,
    FloatVector,
    SparseFloatVector,
}

/// A single field of a collection schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub auto_id: bool,
    /// Maximum length in characters (VARCHAR only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Vector dimension (FLOAT_VECTOR only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    /// Whether the store must tokenize this field for lexical scoring.
    #[serde(default)]
    pub enable_analyzer: bool,
}

impl FieldSchema {
    fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            is_primary: false,
            auto_id: false,
            max_length: None,
            dim: None,
            enable_analyzer: false,
        }
    }

    /// INT64 primary key. With `auto_id` the store generates the values.
    pub fn primary_key(name: &str, auto_id: bool) -> Self {
        Self {
            is_primary: true,
            auto_id,
            ..Self::new(name, DataType::Int64)
        }
    }

    pub fn int64(name: &str) -> Self {
        Self::new(name, DataType::Int64)
    }

    pub fn varchar(name: &str, max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::new(name, DataType::VarChar)
        }
    }

    pub fn float_vector(name: &str, dim: usize) -> Self {
        Self {
            dim: Some(dim),
            ..Self::new(name, DataType::FloatVector)
        }
    }

    pub fn sparse_float_vector(name: &str) -> Self {
        Self::new(name, DataType::SparseFloatVector)
    }

    /// Mark a VARCHAR field as analyzable (tokenized for BM25).
    pub fn with_analyzer(mut self) -> Self {
        self.enable_analyzer = true;
        self
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Built-in functions a store evaluates at insert time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionType {
    /// Derive a sparse lexical representation from analyzed text.
    Bm25,
}

/// A function whose output fields are populated by the store, never the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub function_type: FunctionType,
    pub input_field_names: Vec<String>,
    pub output_field_names: Vec<String>,
}

impl FunctionSchema {
    pub fn bm25(name: &str, input_field: &str, output_field: &str) -> Self {
        Self {
            name: name.to_string(),
            function_type: FunctionType::Bm25,
            input_field_names: vec![input_field.to_string()],
            output_field_names: vec![output_field.to_string()],
        }
    }
}

// =============================================================================
// Collection schema
// =============================================================================

/// Declared shape of a collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub auto_id: bool,
    pub enable_dynamic_field: bool,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub functions: Vec<FunctionSchema>,
}

impl CollectionSchema {
    pub fn new(auto_id: bool, enable_dynamic_field: bool) -> Self {
        Self {
            auto_id,
            enable_dynamic_field,
            fields: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn add_field(&mut self, field: FieldSchema) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn add_function(&mut self, function: FunctionSchema) -> &mut Self {
        self.functions.push(function);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary)
    }

    /// The function that populates `field`, if any.
    pub fn function_for_output(&self, field: &str) -> Option<&FunctionSchema> {
        self.functions
            .iter()
            .find(|func| func.output_field_names.iter().any(|o| o == field))
    }

    /// Fields the caller must supply on insert: everything except an
    /// auto-generated primary key and function outputs.
    pub fn input_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(move |f| {
            !(f.is_primary && f.auto_id) && self.function_for_output(&f.name).is_none()
        })
    }

    /// Check the declaration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(TracklistError::Schema("empty field name".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(TracklistError::Schema(format!(
                    "duplicate field {}",
                    field.name
                )));
            }
            match field.data_type {
                DataType::VarChar if field.max_length.unwrap_or(0) == 0 => {
                    return Err(TracklistError::Schema(format!(
                        "VARCHAR field {} needs a positive max_length",
                        field.name
                    )));
                }
                DataType::FloatVector if field.dim.unwrap_or(0) == 0 => {
                    return Err(TracklistError::Schema(format!(
                        "FLOAT_VECTOR field {} needs a positive dim",
                        field.name
                    )));
                }
                _ => {}
            }
            if field.enable_analyzer && field.data_type != DataType::VarChar {
                return Err(TracklistError::Schema(format!(
                    "analyzer enabled on non-VARCHAR field {}",
                    field.name
                )));
            }
        }

        let primaries: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.is_primary).collect();
        match primaries.as_slice() {
            [pk] if pk.data_type == DataType::Int64 => {}
            [pk] => {
                return Err(TracklistError::Schema(format!(
                    "primary key {} must be INT64",
                    pk.name
                )))
            }
            [] => return Err(TracklistError::Schema("no primary key".to_string())),
            _ => {
                return Err(TracklistError::Schema(
                    "more than one primary key".to_string(),
                ))
            }
        }

        for func in &self.functions {
            let (input, output) = match (
                func.input_field_names.as_slice(),
                func.output_field_names.as_slice(),
            ) {
                ([input], [output]) => (input, output),
                _ => {
                    return Err(TracklistError::Schema(format!(
                        "function {} must have exactly one input and one output",
                        func.name
                    )))
                }
            };
            match self.field(input) {
                Some(f) if f.data_type == DataType::VarChar && f.enable_analyzer => {}
                Some(_) => {
                    return Err(TracklistError::Schema(format!(
                        "function {} input {} must be an analyzed VARCHAR",
                        func.name, input
                    )))
                }
                None => {
                    return Err(TracklistError::Schema(format!(
                        "function {} input {} is not declared",
                        func.name, input
                    )))
                }
            }
            match self.field(output) {
                Some(f) if f.data_type == DataType::SparseFloatVector => {}
                _ => {
                    return Err(TracklistError::Schema(format!(
                        "function {} output {} must be a declared SPARSE_FLOAT_VECTOR",
                        func.name, output
                    )))
                }
            }
        }

        // A sparse field nobody populates could never be searched.
        for field in &self.fields {
            if field.data_type == DataType::SparseFloatVector
                && self.function_for_output(&field.name).is_none()
            {
                return Err(TracklistError::Schema(format!(
                    "SPARSE_FLOAT_VECTOR field {} has no function populating it",
                    field.name
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Indexes
// =============================================================================

/// Index structure kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    #[serde(rename = "FLAT")]
    Flat,
    #[serde(rename = "IVF_FLAT")]
    IvfFlat,
    #[serde(rename = "HNSW")]
    Hnsw,
    #[serde(rename = "SPARSE_INVERTED_INDEX")]
    SparseInvertedIndex,
    #[serde(rename = "SPARSE_WAND")]
    SparseWand,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Flat => "FLAT",
            IndexType::IvfFlat => "IVF_FLAT",
            IndexType::Hnsw => "HNSW",
            IndexType::SparseInvertedIndex => "SPARSE_INVERTED_INDEX",
            IndexType::SparseWand => "SPARSE_WAND",
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, IndexType::SparseInvertedIndex | IndexType::SparseWand)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = TracklistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => Ok(IndexType::Flat),
            "IVF_FLAT" => Ok(IndexType::IvfFlat),
            "HNSW" => Ok(IndexType::Hnsw),
            "SPARSE_INVERTED_INDEX" => Ok(IndexType::SparseInvertedIndex),
            "SPARSE_WAND" => Ok(IndexType::SparseWand),
            other => Err(TracklistError::Config(format!("unknown index type {}", other))),
        }
    }
}

/// Similarity metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Inner product. Higher is more similar.
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "COSINE")]
    Cosine,
    /// Okapi BM25 over an analyzed text field.
    #[serde(rename = "BM25")]
    Bm25,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Ip => "IP",
            MetricType::Cosine => "COSINE",
            MetricType::Bm25 => "BM25",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = TracklistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IP" => Ok(MetricType::Ip),
            "COSINE" => Ok(MetricType::Cosine),
            "BM25" => Ok(MetricType::Bm25),
            other => Err(TracklistError::Config(format!("unknown metric type {}", other))),
        }
    }
}

/// One index declaration over one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub field_name: String,
    pub index_name: String,
    pub index_type: IndexType,
    pub metric_type: MetricType,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// The full set of index declarations for a collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub indexes: Vec<IndexParams>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&mut self, index: IndexParams) -> &mut Self {
        self.indexes.push(index);
        self
    }

    pub fn index_for(&self, field: &str) -> Option<&IndexParams> {
        self.indexes.iter().find(|i| i.field_name == field)
    }

    /// Check each index against the field it targets.
    pub fn validate_against(&self, schema: &CollectionSchema) -> Result<()> {
        let mut names = HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.index_name.as_str()) {
                return Err(TracklistError::Schema(format!(
                    "duplicate index name {}",
                    index.index_name
                )));
            }
            let field = schema.field(&index.field_name).ok_or_else(|| {
                TracklistError::Schema(format!(
                    "index {} targets undeclared field {}",
                    index.index_name, index.field_name
                ))
            })?;
            match field.data_type {
                DataType::FloatVector => {
                    if index.index_type.is_sparse() {
                        return Err(TracklistError::Schema(format!(
                            "{} cannot index dense field {}",
                            index.index_type, field.name
                        )));
                    }
                    if index.metric_type == MetricType::Bm25 {
                        return Err(TracklistError::Schema(format!(
                            "BM25 metric on dense field {}",
                            field.name
                        )));
                    }
                }
                DataType::SparseFloatVector => {
                    if !index.index_type.is_sparse() {
                        return Err(TracklistError::Schema(format!(
                            "{} cannot index sparse field {}",
                            index.index_type, field.name
                        )));
                    }
                    let bm25_output = schema
                        .function_for_output(&field.name)
                        .is_some_and(|f| f.function_type == FunctionType::Bm25);
                    if bm25_output != (index.metric_type == MetricType::Bm25) {
                        return Err(TracklistError::Schema(format!(
                            "sparse field {} must use BM25 exactly when a BM25 function populates it",
                            field.name
                        )));
                    }
                }
                _ => {
                    return Err(TracklistError::Schema(format!(
                        "scalar field {} cannot carry a vector index",
                        field.name
                    )))
                }
            }
        }
        Ok(())
    }
}
