//! Plugin Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A plugin error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
///
/// ### Registration Errors
/// Raised while building a registry or mounting a plugin. The registry is
/// left unchanged; the caller decides whether to abort or skip the plugin.
/// - [`ErrorKind::DuplicateRegistration`]
/// - [`ErrorKind::UnrecognizedKind`]
/// - [`ErrorKind::MissingAttribute`]
/// - [`ErrorKind::InvalidTableKey`]
///
/// ### Run Errors
/// - [`ErrorKind::Store`]
/// - [`ErrorKind::Failed`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another plugin already claimed this table key.
    #[display("duplicate registration for table key '{_0}'")]
    DuplicateRegistration(#[error(not(source))] String),
    /// The plugin does not declare the kind the registry collects.
    #[display("plugin '{_0}' does not declare the expected kind")]
    UnrecognizedKind(#[error(not(source))] String),
    /// A required plugin attribute is empty.
    #[display("plugin '{plugin}' is missing its {attribute}")]
    MissingAttribute {
        /// Plugin name (possibly empty, when the name is what's missing).
        plugin: String,
        /// Which attribute.
        attribute: &'static str,
    },
    /// The declared table key is not a usable table name.
    #[display("plugin '{_0}' declares an invalid table key")]
    InvalidTableKey(#[error(not(source))] String),
    /// A record store operation failed; the store error is attached.
    #[display("record store operation failed")]
    Store,
    /// The plugin's own work failed.
    #[display("plugin failed: {_0}")]
    Failed(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store | Self::Failed(_))
    }

    /// Convenience for plugin implementations reporting their own failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
