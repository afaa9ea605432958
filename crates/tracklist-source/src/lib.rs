//! Ingestion sources for tracklist documents.
//!
//! Reads song documents from JSON files, recovers song arrays from raw
//! language model output, and extracts episode numbers from episode URLs.

pub mod episode;
pub mod listing;
pub mod loader;

pub use episode::{extract_episode_number, pending_episode_urls, read_episode_urls};
pub use listing::parse_listing;
pub use loader::{find_json_files, load_documents, read_and_merge_json_files, read_json_file};
