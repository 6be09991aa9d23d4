//! Error type shared by the portal services

use std::collections::BTreeMap;

/// Field name to message, ordered for stable output
pub type FieldErrors = BTreeMap<String, String>;

/// Error types for portal service operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Single validation message
    #[error("Validation error: {0}")]
    Validation(String),

    /// Per-field validation messages
    #[error("Validation failed for {} field(s)", .0.len())]
    InvalidFields(FieldErrors),

    /// Missing, or owned by someone else
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// `Ok(())` when `errors` is empty, otherwise [`ServiceError::InvalidFields`]
    pub fn check(errors: FieldErrors) -> Result<(), ServiceError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InvalidFields(errors))
        }
    }
}

/// Record `message` under `field` unless `value` has non-whitespace content
pub(crate) fn require(errors: &mut FieldErrors, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_empty_is_ok() {
        assert!(ServiceError::check(FieldErrors::new()).is_ok());
    }

    #[test]
    fn test_require_collects_blank_fields() {
        let mut errors = FieldErrors::new();
        require(&mut errors, "first_name", "  ", "First name is required");
        require(&mut errors, "last_name", "Lee", "Last name is required");

        assert_eq!(errors.len(), 1);
        match ServiceError::check(errors) {
            Err(ServiceError::InvalidFields(fields)) => {
                assert_eq!(fields["first_name"], "First name is required")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
