use circle_shared::ValidationError;
use thiserror::Error;

/// Errors produced by the store layer.
///
/// Every failure of a remote call surfaces as one of these; callers treat
/// them uniformly as transport failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the embedded backend or device storage.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport failure talking to the REST gateway.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    /// A row or response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A filter, order or payload referenced a column the table lacks.
    #[error("Unknown column {column} on table {table}")]
    UnknownColumn { table: &'static str, column: String },

    /// A payload omitted a column that has no default.
    #[error("Missing column {column} on table {table}")]
    MissingColumn { table: &'static str, column: String },

    /// A value that cannot be stored in its column.
    #[error("Invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    /// A remote procedure the backend does not provide.
    #[error("Unknown remote procedure: {0}")]
    UnknownFunction(String),

    /// Invalid arguments passed to a remote procedure.
    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    /// Content rejected before it reached the backend.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the storage directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// A connection mutex was poisoned by a panicking holder.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
