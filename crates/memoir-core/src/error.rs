//! Error taxonomy for the memory subsystem.
//!
//! Every public store and manager operation returns [`Result`]. The
//! variants map onto four failure classes: invalid caller input,
//! missing rows, driver/runtime failures (with cause preserved), and
//! upstream LLM failures during consolidation.

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Memory subsystem error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Illegal identifier, metadata key, or rejected mutation
    #[error("validation failed for {field}: {message}")]
    Validation {
        /// Name of the offending field or identifier
        field: String,
        /// Human-readable description
        message: String,
    },

    /// Referenced memory does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Driver, serialization, or unexpected runtime failure
    #[error("{op}: {message}")]
    Processing {
        /// Operation that failed (e.g. "store", "delete_matching")
        op: String,
        /// Human-readable description
        message: String,
        /// Underlying cause when available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// LLM call failed during consolidation
    #[error("{provider} API error: {message}")]
    Api {
        /// Provider name (e.g. "openai", "mock")
        provider: String,
        /// Human-readable description
        message: String,
    },
}

impl MemoryError {
    /// Validation failure naming the offending field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MemoryError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Missing-row failure
    pub fn not_found(what: impl Into<String>) -> Self {
        MemoryError::NotFound(what.into())
    }

    /// Runtime failure without an underlying cause
    pub fn processing(op: impl Into<String>, message: impl Into<String>) -> Self {
        MemoryError::Processing {
            op: op.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Runtime failure preserving the underlying cause
    pub fn processing_from(
        op: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MemoryError::Processing {
            op: op.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Upstream LLM failure
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        MemoryError::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Memory subsystem result type
pub type Result<T> = std::result::Result<T, MemoryError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_names_field() {
        let err = MemoryError::validation("table_name", "must match identifier pattern");
        let text = err.to_string();
        assert!(text.contains("table_name"));
        assert!(text.contains("identifier pattern"));
    }

    #[test]
    fn test_processing_preserves_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = MemoryError::processing_from("store", cause);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("store"));
    }

    #[test]
    fn test_processing_without_cause() {
        let err = MemoryError::processing("search", "no embedding service attached");
        assert!(std::error::Error::source(&err).is_none());
    }
}
