//! Table layout and idempotent provisioning.
//!
//! Every identifier that reaches SQL text comes from here: column names from
//! a static [`Schema`], table names from a validated [`TableName`]. Values
//! are always bound as parameters.

use exn::ResultExt;
use regex::Regex;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::instrument;

use crate::db::Connection;
use crate::error::{ErrorKind, Result};

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
const TABLE_NAME_MAX_LEN: usize = 48;

/// Suffixes of the auxiliary tables every record table carries.
const LISTS: &str = "lists";
const SERIES_LIST: &str = "series_list";
const TAGS: &str = "tags";
const SERIES_TAGS: &str = "series_tags";

/// A validated table prefix: the plugin's main table and the root of its
/// auxiliary table names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 48 characters, leaving room for
    /// the auxiliary suffixes and index names within SQLite's comfort zone.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > TABLE_NAME_MAX_LEN || !TABLE_NAME.is_match(&name) {
            exn::bail!(ErrorKind::invalid(format!("table name '{name}'")));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn lists(&self) -> String {
        format!("{}_{LISTS}", self.0)
    }

    pub(crate) fn series_list(&self) -> String {
        format!("{}_{SERIES_LIST}", self.0)
    }

    pub(crate) fn tags(&self) -> String {
        format!("{}_{TAGS}", self.0)
    }

    pub(crate) fn series_tags(&self) -> String {
        format!("{}_{SERIES_TAGS}", self.0)
    }

    fn index(&self, column: &str) -> String {
        format!("{}_{column}_index", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a column's values are stored and surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    /// Stored as 0/1.
    Bool,
    Text,
    /// Stored as integer Unix nanoseconds.
    Timestamp,
    /// Stored as a JSON array of strings.
    TextList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Type and constraints, as written after the name in `CREATE TABLE`.
    pub ddl: &'static str,
    /// May be supplied on insert and update.
    pub writable: bool,
    /// May be used as a lookup column in single- and multi-row reads.
    pub lookup: bool,
}

const fn column(name: &'static str, kind: ColumnKind, ddl: &'static str) -> ColumnDef {
    ColumnDef { name, kind, ddl, writable: true, lookup: false }
}

const fn lookup(def: ColumnDef) -> ColumnDef {
    ColumnDef { lookup: true, ..def }
}

/// Column layout of a record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Generated, read-only identity column.
    pub identity: &'static str,
    /// Every column in full column order, identity included.
    pub columns: &'static [ColumnDef],
    /// Columns that together must be unique.
    pub unique: &'static [&'static str],
    /// Columns that get a secondary index.
    pub indexed: &'static [&'static str],
}

impl Schema {
    /// The tracked-work record table.
    pub const RECORDS: Schema = Schema {
        identity: "db_id",
        columns: &[
            ColumnDef {
                name: "db_id",
                kind: ColumnKind::Integer,
                ddl: "INTEGER PRIMARY KEY AUTOINCREMENT",
                writable: false,
                lookup: true,
            },
            lookup(column("change_state", ColumnKind::Integer, "INTEGER DEFAULT 0")),
            lookup(column("title_key", ColumnKind::Text, "TEXT COLLATE NOCASE")),
            column("original_title", ColumnKind::Text, "TEXT"),
            column("volume_title", ColumnKind::Text, "TEXT"),
            column("japanese_title", ColumnKind::Text, "TEXT"),
            column("japanese_volume_title", ColumnKind::Text, "TEXT"),
            column("series", ColumnKind::Text, "TEXT"),
            column("publisher", ColumnKind::Text, "TEXT"),
            column("label", ColumnKind::Text, "TEXT"),
            column("volume_number", ColumnKind::Text, "TEXT COLLATE NOCASE"),
            column("author", ColumnKind::Text, "TEXT"),
            column("illustrator", ColumnKind::Text, "TEXT"),
            column("target", ColumnKind::Text, "TEXT COLLATE NOCASE"),
            column("release_date", ColumnKind::Timestamp, "INTEGER"),
            column("covers", ColumnKind::TextList, "TEXT"),
            column("description", ColumnKind::Text, "TEXT"),
            column("series_entry", ColumnKind::Bool, "INTEGER NOT NULL DEFAULT 0"),
            column("reading_progress", ColumnKind::Integer, "INTEGER"),
            column("available_progress", ColumnKind::Integer, "INTEGER"),
            column("rating", ColumnKind::Integer, "INTEGER"),
            column("last_changed", ColumnKind::Timestamp, "INTEGER"),
            column("last_checked", ColumnKind::Timestamp, "INTEGER"),
            column("first_seen", ColumnKind::Timestamp, "INTEGER NOT NULL"),
        ],
        unique: &["title_key", "series_entry"],
        indexed: &[
            "last_changed",
            "change_state",
            "last_checked",
            "first_seen",
            "rating",
            "title_key",
            "target",
            "series",
            "series_entry",
        ],
    };

    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Column that may be written, or [`ErrorKind::InvalidArgument`].
    pub fn writable(&self, name: &str) -> Result<&'static ColumnDef> {
        match self.column(name) {
            Some(column) if column.writable => Ok(column),
            Some(_) => exn::bail!(ErrorKind::invalid(format!("column '{name}' is read-only"))),
            None => exn::bail!(ErrorKind::invalid(format!("unknown field '{name}'"))),
        }
    }

    /// Column that may be used for lookups, or [`ErrorKind::InvalidArgument`].
    pub fn lookup(&self, name: &str) -> Result<&'static ColumnDef> {
        match self.column(name) {
            Some(column) if column.lookup => Ok(column),
            _ => exn::bail!(ErrorKind::invalid(format!("'{name}' is not a lookup column"))),
        }
    }

    /// Column that may be read, or [`ErrorKind::InvalidArgument`].
    pub fn readable(&self, name: &str) -> Result<&'static ColumnDef> {
        self.column(name).ok_or_else(|| exn::Exn::from(ErrorKind::invalid(format!("unknown column '{name}'"))))
    }

    /// Quoted, comma-separated column list in full column order.
    pub(crate) fn select_list(&self) -> String {
        self.columns.iter().map(|column| format!("\"{}\"", column.name)).collect::<Vec<_>>().join(", ")
    }

    fn create_table(&self, table: &TableName) -> String {
        let mut parts = self.columns.iter().map(|column| format!("\"{}\" {}", column.name, column.ddl)).collect::<Vec<_>>();
        if !self.unique.is_empty() {
            let unique = self.unique.iter().map(|name| format!("\"{name}\"")).collect::<Vec<_>>().join(", ");
            parts.push(format!("UNIQUE ({unique})"));
        }
        format!("CREATE TABLE IF NOT EXISTS \"{table}\" ({})", parts.join(", "))
    }
}

/// Creates the record table, its list and tag tables, and its secondary
/// indexes.
pub struct SchemaManager;

impl SchemaManager {
    /// Make sure every table and index for `table` exists. Safe to run any
    /// number of times, from any number of contexts.
    ///
    /// Runs in a single `BEGIN IMMEDIATE` transaction so concurrent
    /// provisioning passes serialize on the write lock. When the connection
    /// already holds a deferred transaction the pass joins it instead.
    #[instrument(skip(conn, schema), fields(table = %table))]
    pub async fn ensure(conn: &mut Connection, table: &TableName, schema: &Schema) -> Result<()> {
        if conn.in_transaction() {
            return Self::provision(conn.raw(), table, schema).await.or_raise(|| ErrorKind::Schema);
        }
        let raw = conn.raw();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *raw).await.or_raise(|| ErrorKind::Schema)?;
        match Self::provision(&mut *raw, table, schema).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *raw).await.or_raise(|| ErrorKind::Schema)?;
                Ok(())
            },
            Err(err) => {
                _ = sqlx::query("ROLLBACK").execute(&mut *raw).await;
                Err(err).or_raise(|| ErrorKind::Schema)
            },
        }
    }

    async fn provision(conn: &mut SqliteConnection, table: &TableName, schema: &Schema) -> sqlx::Result<()> {
        let identity = schema.identity;
        let statements = [
            schema.create_table(table),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    list_name TEXT NOT NULL UNIQUE COLLATE NOCASE
                )",
                table.lists()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    series_id INTEGER NOT NULL REFERENCES \"{table}\"(\"{identity}\") ON DELETE CASCADE,
                    list_name TEXT NOT NULL COLLATE NOCASE,
                    UNIQUE (series_id)
                )",
                table.series_list()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tag_name TEXT NOT NULL UNIQUE COLLATE NOCASE
                )",
                table.tags()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    series_id INTEGER NOT NULL REFERENCES \"{table}\"(\"{identity}\") ON DELETE CASCADE,
                    tag TEXT NOT NULL COLLATE NOCASE,
                    UNIQUE (series_id, tag)
                )",
                table.series_tags()
            ),
        ];
        for statement in &statements {
            sqlx::query(statement.as_str()).execute(&mut *conn).await?;
        }

        // SQLite identifiers are case-insensitive, so `Novels_*` already
        // exists when `novels_*` does.
        let existing: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT name FROM sqlite_master WHERE type = 'index'")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();
        for column in schema.indexed {
            let index = table.index(column);
            if existing.contains(&index.to_ascii_lowercase()) {
                continue;
            }
            tracing::debug!(index = %index, "Creating index");
            sqlx::query(&format!("CREATE INDEX \"{index}\" ON \"{table}\" (\"{column}\")"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Names of the tables and indexes present for `table`, sorted. SQLite's
    /// automatic indexes are left out.
    pub async fn objects(conn: &mut Connection, table: &TableName) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master
             WHERE tbl_name IN (?, ?, ?, ?, ?) AND name NOT LIKE 'sqlite_autoindex_%'
             ORDER BY name",
        )
        .bind(table.as_str())
        .bind(table.lists())
        .bind(table.series_list())
        .bind(table.tags())
        .bind(table.series_tags())
        .fetch_all(conn.raw())
        .await
        .or_raise(|| ErrorKind::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Connector;
    use rstest::rstest;

    #[rstest]
    #[case("light_novels", true)]
    #[case("_private", true)]
    #[case("Mixed_Case9", true)]
    #[case("9lives", false)]
    #[case("", false)]
    #[case("drop table", false)]
    #[case("quote\"d", false)]
    #[case("dash-ed", false)]
    #[case(&"a".repeat(48), true)]
    #[case(&"a".repeat(49), false)]
    fn test_table_name_validation(#[case] name: &str, #[case] valid: bool) {
        let result = TableName::new(name);
        assert_eq!(result.is_ok(), valid, "{name}");
        if let Err(err) = result {
            assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_records_schema_shape() {
        let schema = Schema::RECORDS;
        assert_eq!(schema.columns.len(), 24);
        assert_eq!(schema.columns[0].name, schema.identity);
        assert_eq!(schema.columns.last().map(|column| column.name), Some("first_seen"));
        let lookups = schema.columns.iter().filter(|column| column.lookup).map(|column| column.name).collect::<Vec<_>>();
        assert_eq!(lookups, ["db_id", "change_state", "title_key"]);
        for column in schema.indexed.iter().chain(schema.unique) {
            assert!(schema.column(column).is_some(), "{column}");
        }
    }

    #[rstest]
    #[case("db_id", false)]
    #[case("title_key", true)]
    #[case("covers", true)]
    #[case("bogus", false)]
    fn test_writable(#[case] name: &str, #[case] writable: bool) {
        assert_eq!(Schema::RECORDS.writable(name).is_ok(), writable);
    }

    #[rstest]
    #[case("db_id", true)]
    #[case("title_key", true)]
    #[case("change_state", true)]
    #[case("series", false)]
    #[case("1; DROP TABLE x", false)]
    fn test_lookup(#[case] name: &str, #[case] allowed: bool) {
        assert_eq!(Schema::RECORDS.lookup(name).is_ok(), allowed);
    }

    async fn connection(dir: &tempfile::TempDir) -> Connection {
        Connector::local(dir.path().join("trawl.db")).connect().await.unwrap()
    }

    #[tokio::test]
    async fn test_ensure_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connection(&dir).await;
        let table = TableName::new("novels").unwrap();
        SchemaManager::ensure(&mut conn, &table, &Schema::RECORDS).await.unwrap();
        let objects = SchemaManager::objects(&mut conn, &table).await.unwrap();
        for name in ["novels", "novels_lists", "novels_series_list", "novels_tags", "novels_series_tags"] {
            assert!(objects.iter().any(|object| object == name), "missing {name}");
        }
        for column in Schema::RECORDS.indexed {
            let index = format!("novels_{column}_index");
            assert!(objects.contains(&index), "missing {index}");
        }
        assert_eq!(objects.len(), 5 + 9);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connection(&dir).await;
        let table = TableName::new("novels").unwrap();
        SchemaManager::ensure(&mut conn, &table, &Schema::RECORDS).await.unwrap();
        let before = SchemaManager::objects(&mut conn, &table).await.unwrap();
        SchemaManager::ensure(&mut conn, &table, &Schema::RECORDS).await.unwrap();
        let after = SchemaManager::objects(&mut conn, &table).await.unwrap();
        assert_eq!(before, after);
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_tables_are_kept_apart_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connection(&dir).await;
        let first = TableName::new("first").unwrap();
        let second = TableName::new("second").unwrap();
        SchemaManager::ensure(&mut conn, &first, &Schema::RECORDS).await.unwrap();
        assert!(SchemaManager::objects(&mut conn, &second).await.unwrap().is_empty());
        SchemaManager::ensure(&mut conn, &second, &Schema::RECORDS).await.unwrap();
        assert_eq!(SchemaManager::objects(&mut conn, &second).await.unwrap().len(), 14);
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_from_separate_connections() {
        let dir = tempfile::tempdir().unwrap();
        let table = TableName::new("shared").unwrap();
        // The file and its WAL journal exist before the racing passes start.
        connection(&dir).await.close().await;
        let tasks = (0..4)
            .map(|_| {
                let connector = Connector::local(dir.path().join("trawl.db"));
                let table = table.clone();
                tokio::spawn(async move {
                    let mut conn = connector.connect().await.unwrap();
                    SchemaManager::ensure(&mut conn, &table, &Schema::RECORDS).await.unwrap();
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        let mut conn = connection(&dir).await;
        assert_eq!(SchemaManager::objects(&mut conn, &table).await.unwrap().len(), 14);
    }

    #[tokio::test]
    async fn test_prefixes_differing_only_in_case_share_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connection(&dir).await;
        let lower = TableName::new("novels").unwrap();
        let upper = TableName::new("Novels").unwrap();
        SchemaManager::ensure(&mut conn, &lower, &Schema::RECORDS).await.unwrap();
        SchemaManager::ensure(&mut conn, &upper, &Schema::RECORDS).await.unwrap();
        assert_eq!(SchemaManager::objects(&mut conn, &lower).await.unwrap().len(), 14);
    }
}
