pub mod config;
pub mod error;
pub mod fusion;
pub mod schema;
pub mod types;

pub use config::TracklistConfig;
pub use error::{Result, TracklistError};
pub use fusion::{Fusion, FusionParams, FusionStrategy, RankedHit, RrfFusion, WeightedFusion};
pub use schema::{
    CollectionSchema, DataType, FieldSchema, FunctionSchema, FunctionType, IndexParams,
    IndexSpec, IndexType, MetricType,
};
pub use types::*;
