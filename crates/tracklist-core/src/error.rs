use thiserror::Error;

/// Top-level error type for the Tracklist system.
///
/// Document-level problems (`MalformedDocument`) are normally filtered out by
/// the ingestion pipeline and only summarized in logs. Everything else is
/// propagated to the caller unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TracklistError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collection {name} does not exist")]
    CollectionNotFound { name: String },

    #[error("Collection {name} already exists. Delete it before recreating it.")]
    CollectionAlreadyExists { name: String },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Unsupported fusion strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Store query error: {0}")]
    StoreQuery(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TracklistError {
    pub fn collection_not_found(name: &str) -> Self {
        TracklistError::CollectionNotFound {
            name: name.to_string(),
        }
    }

    pub fn collection_already_exists(name: &str) -> Self {
        TracklistError::CollectionAlreadyExists {
            name: name.to_string(),
        }
    }
}

impl From<toml::de::Error> for TracklistError {
    fn from(err: toml::de::Error) -> Self {
        TracklistError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TracklistError {
    fn from(err: toml::ser::Error) -> Self {
        TracklistError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TracklistError {
    fn from(err: serde_json::Error) -> Self {
        TracklistError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Tracklist operations.
pub type Result<T> = std::result::Result<T, TracklistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TracklistError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_collection_errors_name_the_collection() {
        let err = TracklistError::collection_not_found("asot_songs");
        assert_eq!(err.to_string(), "Collection asot_songs does not exist");

        let err = TracklistError::collection_already_exists("asot_songs");
        assert!(err.to_string().starts_with("Collection asot_songs already exists"));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(TracklistError, &str)> = vec![
            (
                TracklistError::MalformedDocument("no episode_id".to_string()),
                "Malformed document: no episode_id",
            ),
            (
                TracklistError::UnsupportedStrategy("bogus".to_string()),
                "Unsupported fusion strategy: bogus",
            ),
            (
                TracklistError::Schema("two primary keys".to_string()),
                "Schema error: two primary keys",
            ),
            (
                TracklistError::StoreWrite("disk full".to_string()),
                "Store write error: disk full",
            ),
            (
                TracklistError::StoreQuery("no such table".to_string()),
                "Store query error: no such table",
            ),
            (
                TracklistError::Embedding("model missing".to_string()),
                "Embedding error: model missing",
            ),
            (
                TracklistError::Extraction("no json array".to_string()),
                "Extraction error: no json array",
            ),
            (
                TracklistError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TracklistError = io_err.into();
        assert!(matches!(err, TracklistError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: TracklistError = err.unwrap_err().into();
        assert!(matches!(err, TracklistError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: TracklistError = err.unwrap_err().into();
        assert!(matches!(err, TracklistError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
