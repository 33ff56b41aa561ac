//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Driver failures from `sqlx` are kept
//! as children of the [`ErrorKind`] frame that describes them.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
///
/// ### Caller Errors
/// Returned synchronously to the plugin; the store never retries them.
/// - [`ErrorKind::InvalidArgument`]
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::Constraint`]
///
/// ### Integrity Errors
/// Configuration or schema problems that should be surfaced, not swallowed.
/// - [`ErrorKind::AmbiguousResult`]
/// - [`ErrorKind::Schema`]
/// - [`ErrorKind::InvalidData`]
///
/// ### Infrastructure Errors
/// - [`ErrorKind::ConnectionUnavailable`]
/// - [`ErrorKind::Database`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown field or column name, empty update set, duplicated field,
    /// value of the wrong kind, or an invalid table name.
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    /// The targeted record identity does not exist.
    #[display("record not found: {_0}")]
    NotFound(#[error(not(source))] i64),
    /// A single-row lookup matched more than one row.
    #[display("ambiguous result: {matches} rows matched on column '{column}'")]
    AmbiguousResult {
        /// The lookup column.
        column: &'static str,
        /// How many rows matched.
        matches: usize,
    },
    /// A table constraint rejected the write.
    #[display("constraint violation")]
    Constraint,
    /// Neither the primary nor the fallback connection target could be opened.
    #[display("database connection unavailable")]
    ConnectionUnavailable,
    /// Creating tables or indexes failed.
    #[display("schema provisioning error")]
    Schema,
    /// Any other database driver failure.
    #[display("database error")]
    Database,
    /// A stored value could not be decoded.
    #[display("invalid stored data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable | Self::Database)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Attach a driver error to the [`ErrorKind`] that describes it, telling
/// constraint rejections (unique, not-null, foreign key, check) apart from
/// other failures.
pub(crate) fn classify<T>(result: sqlx::Result<T>) -> Result<T> {
    use exn::ResultExt;
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match &err {
                sqlx::Error::Database(db) if !matches!(db.kind(), sqlx::error::ErrorKind::Other) => {
                    ErrorKind::Constraint
                },
                _ => ErrorKind::Database,
            };
            Err(err).or_raise(|| kind)
        },
    }
}
