//! Song listings from language model output.
//!
//! A model asked to structure a tracklist usually answers with a JSON array
//! of song objects, sometimes wrapped in prose or with trailing commas. The
//! parse strategies below are tried in order and the first one yielding an
//! array of objects wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::types::{fields, RawDocument};

static ARRAY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\[\s*\{.*?\}\s*\])").expect("Invalid array block regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("Invalid trailing comma regex"));

type ParseStrategy = fn(&str) -> Option<Vec<RawDocument>>;

const STRATEGIES: [(&str, ParseStrategy); 3] = [
    ("array_block", parse_array_block),
    ("outer_brackets", parse_outer_brackets),
    ("trailing_commas", parse_without_trailing_commas),
];

/// Parse a model response into raw song documents, attaching `episode_id`
/// and, when given, `url` to each.
///
/// Fails with `Extraction` when no strategy finds an array of objects.
pub fn parse_listing(response: &str, episode: &str, url: Option<&str>) -> Result<Vec<RawDocument>> {
    let (strategy, mut songs) = STRATEGIES
        .iter()
        .find_map(|(name, parse)| parse(response).map(|songs| (*name, songs)))
        .ok_or_else(|| {
            warn!(episode, "No song array in model response");
            TracklistError::Extraction(format!(
                "could not extract a song array for episode {}",
                episode
            ))
        })?;

    debug!(episode, strategy, songs = songs.len(), "Parsed song listing");

    for song in &mut songs {
        song.insert(
            fields::EPISODE_ID.to_string(),
            Value::String(episode.to_string()),
        );
        if let Some(url) = url {
            song.insert(fields::URL.to_string(), Value::String(url.to_string()));
        }
    }
    Ok(songs)
}

fn parse_songs(json: &str) -> Option<Vec<RawDocument>> {
    serde_json::from_str(json).ok()
}

fn array_block(response: &str) -> Option<&str> {
    ARRAY_BLOCK.find(response).map(|m| m.as_str())
}

fn outer_brackets(response: &str) -> Option<&str> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    (start < end).then(|| &response[start..=end])
}

fn parse_array_block(response: &str) -> Option<Vec<RawDocument>> {
    array_block(response).and_then(parse_songs)
}

fn parse_outer_brackets(response: &str) -> Option<Vec<RawDocument>> {
    outer_brackets(response).and_then(parse_songs)
}

fn parse_without_trailing_commas(response: &str) -> Option<Vec<RawDocument>> {
    let block = array_block(response).or_else(|| outer_brackets(response))?;
    parse_songs(&TRAILING_COMMA.replace_all(block, "$1"))
}
