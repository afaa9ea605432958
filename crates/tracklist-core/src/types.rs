use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TracklistError};

// =============================================================================
// Wire constants
// =============================================================================

/// Stored stand-in for an absent text attribute.
pub const TEXT_SENTINEL: &str = "nav";

/// Stored stand-in for an absent integer attribute.
pub const INT_SENTINEL: i64 = -1;

/// Prefix prepended to every text before dense embedding.
pub const DEFAULT_QUERY_PREFIX: &str = "query: ";

pub const EPISODE_ID_MAX_LENGTH: usize = 50;
pub const TEXT_MAX_LENGTH: usize = 10_000;

/// Names of the stored fields of a song record.
pub mod fields {
    pub const ID: &str = "id";
    pub const EPISODE_ID: &str = "episode_id";
    pub const RANKING: &str = "ranking";
    pub const ARTIST: &str = "artist";
    pub const COLLABORATORS: &str = "collaborators";
    pub const FEATURED_ARTISTS: &str = "featured_artists";
    pub const TITLE: &str = "title";
    pub const REMIX_INFO: &str = "remix_info";
    pub const POPULARITY_SCORE: &str = "popularity_score";
    pub const VOTE_COUNT: &str = "vote_count";
    pub const URL: &str = "url";
    /// Composite text, input of the BM25 function.
    pub const TEXT: &str = "text";
    /// BM25 output. Populated by the store.
    pub const SPARSE: &str = "sparse";
    pub const DENSE: &str = "dense";
    /// Undeclared attributes, kept when dynamic fields are enabled.
    pub const META: &str = "$meta";
}

/// Kind of a descriptive attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Text { max_length: usize },
    Int,
}

/// Declaration of one descriptive attribute.
#[derive(Clone, Copy, Debug)]
pub struct AttributeDecl {
    pub name: &'static str,
    pub kind: AttributeKind,
}

const fn text_attr(name: &'static str, max_length: usize) -> AttributeDecl {
    AttributeDecl {
        name,
        kind: AttributeKind::Text { max_length },
    }
}

const fn int_attr(name: &'static str) -> AttributeDecl {
    AttributeDecl {
        name,
        kind: AttributeKind::Int,
    }
}

/// Descriptive attributes in declared order. Composite text follows this order.
pub const SONG_ATTRIBUTES: [AttributeDecl; 9] = [
    int_attr(fields::RANKING),
    text_attr(fields::ARTIST, 512),
    text_attr(fields::COLLABORATORS, 512),
    text_attr(fields::FEATURED_ARTISTS, 512),
    text_attr(fields::TITLE, 512),
    text_attr(fields::REMIX_INFO, 512),
    int_attr(fields::POPULARITY_SCORE),
    int_attr(fields::VOTE_COUNT),
    text_attr(fields::URL, 2048),
];

// =============================================================================
// Store-facing values
// =============================================================================

/// A raw document from the ingestion source: attribute name to optional scalar.
pub type RawDocument = Map<String, Value>;

/// A typed value of one stored field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Vector(Vec<f32>),
    Json(Value),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// One stored row: field name to value.
pub type Entity = BTreeMap<String, FieldValue>;

/// Store acknowledgment of a batch insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertAck {
    pub insert_count: usize,
    /// Generated primary keys, in insertion order.
    pub ids: Vec<i64>,
}

// =============================================================================
// Song
// =============================================================================

/// Borrowed view of one attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    Text(Option<&'a str>),
    Int(Option<i64>),
}

impl AttributeValue<'_> {
    fn render(&self) -> Option<String> {
        match self {
            AttributeValue::Text(v) => v.map(str::to_string),
            AttributeValue::Int(v) => v.map(|n| n.to_string()),
        }
    }
}

/// One song of one episode, with explicit absence per attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub episode_id: String,
    pub ranking: Option<i64>,
    pub artist: Option<String>,
    pub collaborators: Option<String>,
    pub featured_artists: Option<String>,
    pub title: Option<String>,
    pub remix_info: Option<String>,
    pub popularity_score: Option<i64>,
    pub vote_count: Option<i64>,
    pub url: Option<String>,
    /// Attributes the document carried that are not declared fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Song {
    /// Attribute values in declared order.
    pub fn attributes(&self) -> [(&'static str, AttributeValue<'_>); 9] {
        [
            (fields::RANKING, AttributeValue::Int(self.ranking)),
            (fields::ARTIST, AttributeValue::Text(self.artist.as_deref())),
            (
                fields::COLLABORATORS,
                AttributeValue::Text(self.collaborators.as_deref()),
            ),
            (
                fields::FEATURED_ARTISTS,
                AttributeValue::Text(self.featured_artists.as_deref()),
            ),
            (fields::TITLE, AttributeValue::Text(self.title.as_deref())),
            (
                fields::REMIX_INFO,
                AttributeValue::Text(self.remix_info.as_deref()),
            ),
            (
                fields::POPULARITY_SCORE,
                AttributeValue::Int(self.popularity_score),
            ),
            (fields::VOTE_COUNT, AttributeValue::Int(self.vote_count)),
            (fields::URL, AttributeValue::Text(self.url.as_deref())),
        ]
    }

    /// Build a song from a raw source document.
    ///
    /// Fails with `MalformedDocument` when the document has no usable
    /// `episode_id`. Every other attribute degrades to `None`.
    pub fn from_raw(doc: &RawDocument) -> Result<Self> {
        let episode_id = doc
            .get(fields::EPISODE_ID)
            .and_then(coerce_text)
            .map(|id| truncate_chars(&id, EPISODE_ID_MAX_LENGTH))
            .ok_or_else(|| {
                TracklistError::MalformedDocument(format!(
                    "missing '{}' in {}",
                    fields::EPISODE_ID,
                    Value::Object(doc.clone())
                ))
            })?;

        let text = |name: &str, max: usize| {
            lookup(doc, name)
                .and_then(coerce_text)
                .map(|v| truncate_chars(&v, max))
        };
        let int = |name: &str| lookup(doc, name).and_then(coerce_int);

        let mut song = Song {
            episode_id,
            ranking: int(fields::RANKING),
            artist: text(fields::ARTIST, 512),
            collaborators: text(fields::COLLABORATORS, 512),
            featured_artists: text(fields::FEATURED_ARTISTS, 512),
            title: text(fields::TITLE, 512),
            remix_info: text(fields::REMIX_INFO, 512),
            popularity_score: int(fields::POPULARITY_SCORE),
            vote_count: int(fields::VOTE_COUNT),
            url: text(fields::URL, 2048),
            extra: Map::new(),
        };

        for (key, value) in doc {
            if !is_declared_key(key) && !value.is_null() {
                song.extra.insert(key.clone(), value.clone());
            }
        }

        Ok(song)
    }

    /// Space-joined present values: `episode_id`, then attributes in declared
    /// order. Absent attributes are skipped.
    pub fn composite_text(&self) -> String {
        let mut parts = vec![self.episode_id.clone()];
        parts.extend(self.attributes().iter().filter_map(|(_, v)| v.render()));
        truncate_chars(&parts.join(" "), TEXT_MAX_LENGTH)
    }

    /// Convert to the stored representation, substituting sentinels.
    pub fn to_entity(&self, text: String, dense: Vec<f32>, with_meta: bool) -> Entity {
        let mut entity = Entity::new();
        entity.insert(
            fields::EPISODE_ID.to_string(),
            FieldValue::Text(self.episode_id.clone()),
        );
        for (name, value) in self.attributes() {
            let stored = match value {
                AttributeValue::Text(v) => {
                    FieldValue::Text(v.unwrap_or(TEXT_SENTINEL).to_string())
                }
                AttributeValue::Int(v) => FieldValue::Int(v.unwrap_or(INT_SENTINEL)),
            };
            entity.insert(name.to_string(), stored);
        }
        entity.insert(fields::TEXT.to_string(), FieldValue::Text(text));
        entity.insert(fields::DENSE.to_string(), FieldValue::Vector(dense));
        if with_meta && !self.extra.is_empty() {
            entity.insert(
                fields::META.to_string(),
                FieldValue::Json(Value::Object(self.extra.clone())),
            );
        }
        entity
    }

    /// Read a song back from a stored row, mapping sentinels to `None`.
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let episode_id = entity
            .get(fields::EPISODE_ID)
            .and_then(FieldValue::as_text)
            .ok_or_else(|| {
                TracklistError::StoreQuery(format!("record without {}", fields::EPISODE_ID))
            })?
            .to_string();

        let text = |name: &str| {
            entity
                .get(name)
                .and_then(FieldValue::as_text)
                .filter(|v| *v != TEXT_SENTINEL)
                .map(str::to_string)
        };
        let int = |name: &str| {
            entity
                .get(name)
                .and_then(FieldValue::as_int)
                .filter(|v| *v != INT_SENTINEL)
        };

        let extra = match entity.get(fields::META) {
            Some(FieldValue::Json(Value::Object(map))) => map.clone(),
            _ => Map::new(),
        };

        Ok(Song {
            episode_id,
            ranking: int(fields::RANKING),
            artist: text(fields::ARTIST),
            collaborators: text(fields::COLLABORATORS),
            featured_artists: text(fields::FEATURED_ARTISTS),
            title: text(fields::TITLE),
            remix_info: text(fields::REMIX_INFO),
            popularity_score: int(fields::POPULARITY_SCORE),
            vote_count: int(fields::VOTE_COUNT),
            url: text(fields::URL),
            extra,
        })
    }
}

/// A ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Store primary key of the record.
    pub id: i64,
    /// Relevance score; meaning depends on the search mode.
    pub score: f64,
    pub song: Song,
}

// =============================================================================
// Coercion helpers
// =============================================================================

fn is_declared_key(key: &str) -> bool {
    key == fields::EPISODE_ID
        || key == "URL"
        || SONG_ATTRIBUTES.iter().any(|a| a.name == key)
}

fn lookup<'a>(doc: &'a RawDocument, name: &str) -> Option<&'a Value> {
    match doc.get(name) {
        Some(v) => Some(v),
        // Older extraction output used an upper-case URL key.
        None if name == fields::URL => doc.get("URL"),
        None => None,
    }
}

/// Coerce a scalar into present text. Blank strings and the sentinel are absent.
fn coerce_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Extraction sometimes returns artist lists.
        Value::Array(items) => items
            .iter()
            .filter_map(coerce_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    if text.is_empty() || text == TEXT_SENTINEL {
        None
    } else {
        Some(text)
    }
}

/// Coerce a scalar into a present integer. The sentinel is absent.
fn coerce_int(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().replace(',', "").parse::<i64>().ok(),
        _ => None,
    }?;
    (n != INT_SENTINEL).then_some(n)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_from_raw_requires_episode_id() {
        let err = Song::from_raw(&raw(json!({"title": "Song1"}))).unwrap_err();
        assert!(matches!(err, TracklistError::MalformedDocument(_)));

        let err = Song::from_raw(&raw(json!({"episode_id": null}))).unwrap_err();
        assert!(matches!(err, TracklistError::MalformedDocument(_)));
    }

    #[test]
    fn test_from_raw_numeric_episode_id() {
        let song = Song::from_raw(&raw(json!({"episode_id": 1000}))).unwrap();
        assert_eq!(song.episode_id, "1000");
    }

    #[test]
    fn test_from_raw_coerces_values() {
        let song = Song::from_raw(&raw(json!({
            "episode_id": "950",
            "ranking": "3",
            "artist": "  Armin van Buuren ",
            "collaborators": ["Vini Vici", "Hilight Tribe"],
            "popularity_score": 1234.0,
            "vote_count": "1,024",
            "URL": "https://example.com/950",
            "label": "Armada"
        })))
        .unwrap();

        assert_eq!(song.ranking, Some(3));
        assert_eq!(song.artist.as_deref(), Some("Armin van Buuren"));
        assert_eq!(song.collaborators.as_deref(), Some("Vini Vici, Hilight Tribe"));
        assert_eq!(song.popularity_score, Some(1234));
        assert_eq!(song.vote_count, Some(1024));
        assert_eq!(song.url.as_deref(), Some("https://example.com/950"));
        assert_eq!(song.extra.get("label"), Some(&json!("Armada")));
        assert!(!song.extra.contains_key("URL"));
    }

    #[test]
    fn test_sentinel_and_blank_inputs_are_absent() {
        let song = Song::from_raw(&raw(json!({
            "episode_id": "1",
            "artist": "nav",
            "title": "   ",
            "ranking": -1
        })))
        .unwrap();
        assert_eq!(song.artist, None);
        assert_eq!(song.title, None);
        assert_eq!(song.ranking, None);
    }

    #[test]
    fn test_composite_text_declared_order_skips_absent() {
        let song = Song {
            episode_id: "A".to_string(),
            ranking: Some(1),
            artist: Some("Artist".to_string()),
            title: Some("Song1".to_string()),
            vote_count: Some(42),
            ..Default::default()
        };
        assert_eq!(song.composite_text(), "A 1 Artist Song1 42");
    }

    #[test]
    fn test_composite_text_only_episode() {
        let song = Song {
            episode_id: "B".to_string(),
            ..Default::default()
        };
        assert_eq!(song.composite_text(), "B");
    }

    #[test]
    fn test_to_entity_substitutes_sentinels() {
        let song = Song {
            episode_id: "A".to_string(),
            title: Some("Song1".to_string()),
            ..Default::default()
        };
        let entity = song.to_entity(song.composite_text(), vec![0.5, 0.5], false);

        for attr in SONG_ATTRIBUTES {
            let value = entity.get(attr.name).expect("every attribute is populated");
            match attr.kind {
                AttributeKind::Int => assert_eq!(value, &FieldValue::Int(INT_SENTINEL)),
                AttributeKind::Text { .. } if attr.name == fields::TITLE => {
                    assert_eq!(value, &FieldValue::Text("Song1".to_string()))
                }
                AttributeKind::Text { .. } => {
                    assert_eq!(value, &FieldValue::Text(TEXT_SENTINEL.to_string()))
                }
            }
        }
        assert_eq!(
            entity.get(fields::TEXT),
            Some(&FieldValue::Text("A Song1".to_string()))
        );
        assert!(!entity.contains_key(fields::META));
    }

    #[test]
    fn test_entity_roundtrip_restores_absence() {
        let mut extra = Map::new();
        extra.insert("label".to_string(), json!("Armada"));
        let song = Song {
            episode_id: "A".to_string(),
            artist: Some("Artist".to_string()),
            ranking: Some(2),
            extra,
            ..Default::default()
        };
        let entity = song.to_entity(song.composite_text(), vec![1.0], true);
        let back = Song::from_entity(&entity).unwrap();
        assert_eq!(back, song);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
