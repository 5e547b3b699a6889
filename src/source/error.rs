//! Data source error types
//!
//! Defines all errors that can occur while querying the underlying store.

use thiserror::Error;

/// Errors that can occur in a data source
#[derive(Error, Debug)]
pub enum SourceError {
    /// Entity (table) is not part of the schema
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Field path could not be resolved on an entity
    #[error("Field \"{path}\" not found on entity \"{entity}\"")]
    FieldNotFound { entity: String, path: String },

    /// A path tried to traverse through a non-relation field
    #[error("Field \"{field}\" on entity \"{entity}\" is not a relation")]
    NotARelation { entity: String, field: String },

    /// Lookup key or cell value could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// SQLite backend failure
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// CSV reading failure
    #[error("CSV error: {0}")]
    Csv(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Sqlite(err.to_string())
    }
}

impl From<csv::Error> for SourceError {
    fn from(err: csv::Error) -> Self {
        SourceError::Csv(err.to_string())
    }
}

/// Result type alias for data source operations
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::FieldNotFound {
            entity: "sales".to_string(),
            path: "client__nope".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Field \"client__nope\" not found on entity \"sales\""
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let source_err: SourceError = io_err.into();
        assert!(matches!(source_err, SourceError::Io(_)));
    }
}
