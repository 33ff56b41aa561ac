//! Shared record storage for ingestion plugins.
//!
//! Each plugin owns a family of tables (a main record table plus list and
//! tag tables) in one shared SQLite database. Concurrent plugin invocations
//! never share a connection: a [`ResourceMultiplexer`] hands every execution
//! [`Context`] its own connection and logger, and a [`RecordStore`] runs every
//! operation on the calling context's connection.
//!
//! # Architecture
//! - [`Connector`] opens connections, falling back to a secondary target when
//!   the primary is unreachable.
//! - [`SchemaManager`] idempotently provisions a table family and its
//!   indexes.
//! - [`RecordStore`] validates every field and lookup column against a static
//!   [`Schema`] allow-list and binds every value, so plugin-supplied data
//!   never reaches SQL text.

mod context;
mod db;
pub mod error;
mod membership;
mod models;
mod repo;
mod schema;

pub use crate::context::{Context, ContextId, ContextLogger, ResourceMultiplexer, SharedConnection};
pub use crate::db::{Connection, Connector};
pub use crate::models::{Fields, Record, RecordId, Value};
pub use crate::repo::RecordStore;
pub use crate::schema::{ColumnDef, ColumnKind, Schema, SchemaManager, TableName};
