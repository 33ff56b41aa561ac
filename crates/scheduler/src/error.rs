//! Scheduler Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A scheduler error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// None of them come from a plugin's own run: those are logged and contained
/// by the scheduler.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Two schedule entries share a startup offset.
    #[display("startup offset {_0} is already taken")]
    DuplicateOffset(#[error(not(source))] u32),
    /// A selected offset has no schedule entry.
    #[display("no plugin scheduled at offset {_0}")]
    UnknownOffset(#[error(not(source))] u32),
    /// A schedule entry has a zero re-run interval.
    #[display("plugin at offset {_0} has a zero interval")]
    InvalidInterval(#[error(not(source))] u32),
    /// The plugin scheduled at this offset could not be mounted.
    #[display("plugin at offset {_0} could not be mounted")]
    Mount(#[error(not(source))] u32),
    /// The database configuration could not be turned into a connector.
    #[display("invalid database configuration")]
    Database,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
