//! Configuration Error Types
//!
//! Errors raised while loading and validating `TaskerConfig`. Validation collects
//! every schema violation instead of stopping at the first one.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file could not be read
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// Configuration source could not be parsed or deserialized
    #[error("Parse error for '{source_name}': {reason}")]
    ParseError { source_name: String, reason: String },

    /// Schema validation failed; every violation is listed
    #[error("Configuration validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    /// Create a file read error
    pub fn file_read_error<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    /// Create a parse error
    pub fn parse_error<S: Into<String>, E: std::fmt::Display>(source_name: S, reason: E) -> Self {
        Self::ParseError {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a validation error from the collected violations
    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Individual violations, when this is a validation failure
    pub fn validation_errors(&self) -> &[String] {
        match self {
            Self::ValidationFailed { errors } => errors,
            _ => &[],
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_lists_every_error() {
        let error = ConfigurationError::validation_failed(vec![
            "exchange: must not be empty".to_string(),
            "profiles.emailer.tasks: 'send*' contains a wildcard".to_string(),
        ]);
        let message = error.to_string();
        assert!(message.contains("exchange: must not be empty"));
        assert!(message.contains("'send*' contains a wildcard"));
        assert_eq!(error.validation_errors().len(), 2);
    }

    #[test]
    fn test_invalid_value_error() {
        let error = ConfigurationError::invalid_value("broker.backend", "kafka", "unsupported");
        assert!(error.to_string().contains("broker.backend"));
        assert!(error.validation_errors().is_empty());
    }
}
