use thiserror::Error;

/// Top-level error type for the Datadesk system.
///
/// Each variant covers one subsystem. Crates with richer failure modes
/// (chat, api) define their own error types and convert to and from this one
/// so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatadeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DatadeskError {
    fn from(err: toml::de::Error) -> Self {
        DatadeskError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DatadeskError {
    fn from(err: toml::ser::Error) -> Self {
        DatadeskError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DatadeskError {
    fn from(err: serde_json::Error) -> Self {
        DatadeskError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Datadesk operations.
pub type Result<T> = std::result::Result<T, DatadeskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DatadeskError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(DatadeskError, &str)> = vec![
            (
                DatadeskError::Source("timeout".to_string()),
                "Source error: timeout",
            ),
            (
                DatadeskError::Storage("lock poisoned".to_string()),
                "Storage error: lock poisoned",
            ),
            (
                DatadeskError::Query("no such table: x".to_string()),
                "Query error: no such table: x",
            ),
            (
                DatadeskError::Llm("HTTP 500".to_string()),
                "LLM error: HTTP 500",
            ),
            (
                DatadeskError::Api("bind failed".to_string()),
                "API error: bind failed",
            ),
            (
                DatadeskError::Serialization("invalid json".to_string()),
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
        let err: DatadeskError = io_err.into();
        assert!(matches!(err, DatadeskError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: DatadeskError = err.unwrap_err().into();
        assert!(matches!(err, DatadeskError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: DatadeskError = err.unwrap_err().into();
        assert!(matches!(err, DatadeskError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
