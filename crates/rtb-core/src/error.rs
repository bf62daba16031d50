//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The monitor delivered an empty report payload.
    #[error("empty door state report")]
    EmptyReport,

    /// A characteristic code was outside its defined range.
    #[error("invalid {field} code: {value}")]
    InvalidCode {
        field: &'static str,
        value: u8,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
