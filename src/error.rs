//! Error types for the access layer

use thiserror::Error;

/// Main error type for the access layer
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any store traffic
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Aggregation window could not be converted
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Series store reported a failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Write ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Input validation errors
///
/// Raised locally, before a command is rendered or executed. A caller
/// receiving one of these can be certain no store traffic was issued.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Duplicate policy is not one of the six accepted values
    #[error("Invalid duplicate policy: {0}")]
    InvalidDuplicatePolicy(String),

    /// Multi-series query issued without a single filter label
    #[error("Multi-series query requires at least one filter label")]
    MissingFilter,

    /// Required field is missing or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Aggregation window conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    /// No recognized unit suffix in the window expression
    #[error("Unrecognized time unit in window expression: {0:?}")]
    UnknownUnit(String),

    /// The magnitude before the unit suffix is not an integer
    #[error("Invalid magnitude {magnitude:?} in window expression {expression:?}")]
    InvalidMagnitude {
        /// The non-integer prefix that failed to parse
        magnitude: String,
        /// The full window expression
        expression: String,
    },
}

/// Series store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection to the store could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command was sent but the store reported a failure
    #[error("Command failed: {0}")]
    Execution(String),

    /// Command did not complete within the configured timeout
    #[error("Command timeout")]
    Timeout,
}

/// Write ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Ledger table name contains characters outside [A-Za-z0-9_]
    #[error("Invalid ledger table name: {0:?}")]
    InvalidTable(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
