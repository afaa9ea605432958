//! Tracklist Storage crate - the collection store.
//!
//! Provides the [`Store`] trait and an embedded SQLite implementation with
//! exact dense scans and FTS5-backed BM25 lexical search.

pub mod db;
pub mod dense;
pub mod lexical;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use db::Database;
pub use lexical::sanitize_fts5_query;
pub use sqlite::SqliteStore;
pub use store::{AnnRequest, CollectionDescription, QueryData, QueryFilter, Store, StoreHit};
