//! Report error types
//!
//! Configuration problems are detected while building a generator and
//! surface as [`ConfigurationError`]. Everything that can fail afterwards
//! (querying, resolving rows) is a [`ReportError`].

use crate::fields::RegistryError;
use crate::source::SourceError;
use thiserror::Error;

/// Invalid report definition, raised at construction time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// No report entity was given
    #[error("report entity must be set")]
    MissingReportModel,

    /// A time series was requested without a date field
    #[error("date_field must be set when a time series is requested")]
    MissingDateField,

    /// The group-by path does not resolve on the report entity
    #[error("Can not find group_by field: {group_by} in report entity {entity}")]
    GroupByNotFound { group_by: String, entity: String },

    /// A column is neither a computation field, an attribute nor a database field
    #[error(
        "Field \"{column}\" not found either as an attribute to the report {container}, \
         or a computation field, or a database column for the entity \"{entity}\""
    )]
    FieldNotFound {
        column: String,
        container: String,
        entity: String,
    },

    /// The crosstab dimension path does not resolve
    #[error("Can not find crosstab field: {field} in report entity {entity}")]
    CrosstabFieldNotFound { field: String, entity: String },

    /// Computation field requirements form a cycle
    #[error("Dependency cycle between computation fields: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Any other inconsistent option
    #[error("Misconfigured report: {0}")]
    Misconfigured(String),
}

/// Errors raised while building or running a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    /// Unknown time series pattern name
    #[error("\"{0}\" is not implemented for time_series_pattern")]
    UnsupportedPattern(String),

    /// A computation field was prepared twice in the same run
    #[error("Computation field {0} is already prepared")]
    AlreadyPrepared(String),

    /// A computation field was resolved before being prepared
    #[error("Computation field {0} is not prepared")]
    NotPrepared(String),

    /// A dependency value was asked for but never prepared
    #[error("Computation field {field} has no prepared dependency {dependency}")]
    DependencyMissing { field: String, dependency: String },

    /// A row attribute resolver failed
    #[error("Attribute {name} failed: {message}")]
    Attribute { name: String, message: String },

    /// Reading a report definition failed
    #[error("Definition error: {0}")]
    Definition(String),
}

/// Result type alias for report operations
pub type ReportResult<T> = Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_not_found_message() {
        let err = ConfigurationError::FieldNotFound {
            column: "nope".to_string(),
            container: "ClientTotals".to_string(),
            entity: "client".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("\"nope\""));
        assert!(message.contains("ClientTotals"));
        assert!(message.contains("\"client\""));
    }

    #[test]
    fn test_cycle_message() {
        let err = ConfigurationError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle between computation fields: a -> b -> a");
    }

    #[test]
    fn test_conversions() {
        let err: ReportError = RegistryError::NotRegistered("x".into()).into();
        assert!(matches!(err, ReportError::Registry(_)));
        let err: ReportError = ConfigurationError::MissingDateField.into();
        assert!(matches!(err, ReportError::Configuration(_)));
    }
}
