//! Error types for Mallard

use thiserror::Error;

/// The main error type for Mallard operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Type and format errors
    #[error("Invalid type {type_name}: {message}")]
    InvalidType { type_name: String, message: String },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    // Execution errors
    #[error("Interrupted!")]
    Interrupted,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Overflow in {operation}")]
    Overflow { operation: String },

    // Storage errors
    #[error("Out of memory: could not allocate block of {requested} bytes (limit {limit} bytes)")]
    OutOfMemory { requested: usize, limit: usize },

    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    #[error("Corrupted block: {0}")]
    CorruptedBlock(String),

    // Transaction errors
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Conflict on update of row {0}")]
    WriteConflict(u64),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // General errors
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an `InvalidType` error
    pub fn invalid_type(type_name: impl ToString, message: impl Into<String>) -> Self {
        Error::InvalidType {
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias using Mallard's Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Interrupted.to_string(), "Interrupted!");
        assert_eq!(
            Error::invalid_type("VARCHAR", "no fixed width").to_string(),
            "Invalid type VARCHAR: no fixed width"
        );
        assert_eq!(Error::WriteConflict(7).to_string(), "Conflict on update of row 7");
    }
}
