//! Error types for the SQLite executor.
//!
//! Covers database access and the conversion between native column values
//! and SQLite storage classes. Errors cross the executor boundary boxed as a
//! [`DriverError`](protorow_core::DriverError).

use thiserror::Error;

/// Errors that can occur while running statements on SQLite.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// A stored value does not convert into the requested native type.
    #[error("conversion error: {0}")]
    ConversionError(String),

    /// An array column holds malformed JSON.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error raised by the core, e.g. a type-checked assignment.
    #[error(transparent)]
    CoreError(#[from] protorow_core::Error),
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
