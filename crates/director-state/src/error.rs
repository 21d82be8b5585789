//! Error types for the Director state store.
//!
//! The first five variants form the caller-facing taxonomy; their display
//! strings are the messages returned to API clients. The rest wrap storage
//! failures.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Object not found [object={0}]")]
    NotFound(String),

    #[error("Object name is not unique [object={0}]")]
    AlreadyExists(String),

    /// Operation blocked by existing state (e.g. formation membership).
    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient permissions [reason={0}]")]
    Forbidden(String),

    #[error("Invalid data [reason={0}]")]
    Validation(String),

    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_facing_messages() {
        assert_eq!(
            StateError::NotFound("formation".into()).to_string(),
            "Object not found [object=formation]"
        );
        assert_eq!(
            StateError::AlreadyExists("application".into()).to_string(),
            "Object name is not unique [object=application]"
        );
        assert_eq!(StateError::Conflict("blocked".into()).to_string(), "blocked");
    }
}
