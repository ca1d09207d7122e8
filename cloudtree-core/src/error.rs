use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_VALIDATION_FAILED: &str = "VALIDATION_FAILED";
pub const CODE_RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
pub const CODE_NAME_CONFLICT: &str = "NAME_CONFLICT";
pub const CODE_POLICY_VIOLATION: &str = "POLICY_VIOLATION";
pub const CODE_UNEXPECTED_ERROR: &str = "UNEXPECTED_ERROR";
pub const CODE_OPERATION_CANCELLED: &str = "OPERATION_CANCELLED";
pub const CODE_ROLLBACK_FAILED: &str = "ROLLBACK_FAILED";
pub const CODE_DIRECTORY_COPY_ROLLBACK_FAILED: &str = "DIRECTORY_COPY_ROLLBACK_FAILED";

/// Error taxonomy shared by every layer. Callers branch on the kind (or its
/// stable code), never on the concrete error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationFailed,
    ResourceNotFound,
    NameConflict,
    PolicyViolation,
    UnexpectedError,
    Cancelled,
    RollbackFailed,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => CODE_VALIDATION_FAILED,
            ErrorKind::ResourceNotFound => CODE_RESOURCE_NOT_FOUND,
            ErrorKind::NameConflict => CODE_NAME_CONFLICT,
            ErrorKind::PolicyViolation => CODE_POLICY_VIOLATION,
            ErrorKind::UnexpectedError => CODE_UNEXPECTED_ERROR,
            ErrorKind::Cancelled => CODE_OPERATION_CANCELLED,
            ErrorKind::RollbackFailed => CODE_ROLLBACK_FAILED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("name conflict: {0}")]
    NameConflict(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

impl TreeError {
    pub fn validation(message: impl Into<String>) -> Self {
        TreeError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        TreeError::NotFound(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::Validation(_) => ErrorKind::ValidationFailed,
            TreeError::NotFound(_) => ErrorKind::ResourceNotFound,
            TreeError::NameConflict(_) => ErrorKind::NameConflict,
            TreeError::PolicyViolation(_) => ErrorKind::PolicyViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::ValidationFailed.code(), "VALIDATION_FAILED");
        assert_eq!(ErrorKind::ResourceNotFound.code(), "RESOURCE_NOT_FOUND");
        assert_eq!(ErrorKind::RollbackFailed.code(), "ROLLBACK_FAILED");
    }

    #[test]
    fn tree_errors_map_to_kinds() {
        assert_eq!(
            TreeError::NameConflict("a".into()).kind(),
            ErrorKind::NameConflict
        );
        assert_eq!(
            TreeError::PolicyViolation("b".into()).kind(),
            ErrorKind::PolicyViolation
        );
    }
}
