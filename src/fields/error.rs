//! Field registry errors

use thiserror::Error;

/// Errors raised by the field registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A field with this name is already registered
    #[error("Field \"{0}\" is already registered")]
    AlreadyRegistered(String),

    /// Unregistering a name that was never registered
    #[error("Field \"{0}\" is not registered")]
    NotRegistered(String),

    /// Lookup of an unknown name
    #[error("Field \"{name}\" is not found in the field registry. Options are {}", .options.join(","))]
    NotFound { name: String, options: Vec<String> },
}

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_options() {
        let err = RegistryError::NotFound {
            name: "__nope__".to_string(),
            options: vec!["__debit__".to_string(), "__credit__".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Field \"__nope__\" is not found in the field registry. Options are __debit__,__credit__"
        );
    }
}
