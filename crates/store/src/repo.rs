//! Allow-listed record access for one table family.

use sqlx::sqlite::SqliteQueryResult;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::context::Context;
use crate::db::Connection;
use crate::error::{ErrorKind, Result, classify};
use crate::models::{Fields, Record, RecordId, Value, bind, decode};
use crate::schema::{ColumnDef, Schema, SchemaManager, TableName};

/// Record access for one table and its auxiliary list and tag tables.
///
/// Every operation runs on the calling context's own connection. The tables
/// are provisioned on first use, once per store (clones share that state).
///
/// # Transactions
///
/// Writes take a `commit` flag. With `commit = true` the write, and anything
/// deferred before it on the same connection, is committed immediately.
/// With `commit = false` the write joins (or opens) a deferred transaction
/// that stays open until a later committing write, [`commit`](Self::commit)
/// or [`rollback`](Self::rollback). Deferring holds SQLite's write lock, so
/// callers should not defer for long.
#[derive(Debug, Clone)]
pub struct RecordStore {
    table: TableName,
    schema: &'static Schema,
    provisioned: Arc<OnceCell<()>>,
}

impl RecordStore {
    pub fn new(table: TableName, schema: &'static Schema) -> Self {
        Self { table, schema, provisioned: Arc::new(OnceCell::new()) }
    }

    /// Store over [`Schema::RECORDS`].
    pub fn records(table: TableName) -> Self {
        Self::new(table, &Schema::RECORDS)
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Run `f` on the context's connection, provisioning the schema first
    /// if this store has not done so yet.
    pub(crate) async fn with_connection<T>(
        &self,
        cx: &Context,
        f: impl AsyncFnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = cx.connection().await?;
        let mut guard = conn.lock().await;
        if !self.provisioned.initialized() {
            let conn: &mut Connection = &mut guard;
            if conn.in_transaction() {
                // Provisioning joins the pending transaction and is undone if
                // that rolls back, so it is not remembered.
                SchemaManager::ensure(conn, &self.table, self.schema).await?;
            } else {
                self.provisioned
                    .get_or_try_init(move || SchemaManager::ensure(conn, &self.table, self.schema))
                    .await?;
            }
        }
        f(&mut *guard).await
    }

    /// Execute one write honouring the `commit` flag.
    pub(crate) async fn write<'q>(
        conn: &mut Connection,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        commit: bool,
    ) -> Result<SqliteQueryResult> {
        if commit && !conn.in_transaction() {
            return classify(query.execute(conn.raw()).await);
        }
        conn.begin().await?;
        let result = classify(query.execute(conn.raw()).await)?;
        if commit {
            conn.commit().await?;
        }
        Ok(result)
    }

    /// Check every field against the writable allow-list and its declared
    /// kind, without touching the database.
    fn validate<'f>(&self, fields: &'f Fields) -> Result<Vec<(&'static ColumnDef, &'f Value)>> {
        let mut seen = HashSet::new();
        let mut checked = Vec::with_capacity(fields.len());
        for (name, value) in fields.iter() {
            let column = self.schema.writable(name)?;
            if !seen.insert(column.name) {
                exn::bail!(ErrorKind::invalid(format!("field '{name}' supplied more than once")));
            }
            Self::check_kind(column, value)?;
            checked.push((column, value));
        }
        Ok(checked)
    }

    fn check_kind(column: &ColumnDef, value: &Value) -> Result<()> {
        match value.kind() {
            Some(kind) if kind != column.kind => exn::bail!(ErrorKind::invalid(format!(
                "column '{}' holds {:?} values, got {kind:?}",
                column.name, column.kind
            ))),
            _ => Ok(()),
        }
    }

    /// Insert a new record and return its identity.
    ///
    /// Columns not supplied take their schema defaults.
    #[instrument(skip(self, cx, fields), fields(table = %self.table, fields = fields.len()))]
    pub async fn insert(&self, cx: &Context, fields: &Fields, commit: bool) -> Result<RecordId> {
        let checked = self.validate(fields)?;
        let sql = if checked.is_empty() {
            format!("INSERT INTO \"{}\" DEFAULT VALUES", self.table)
        } else {
            let columns = checked.iter().map(|(column, _)| format!("\"{}\"", column.name)).collect::<Vec<_>>();
            let placeholders = vec!["?"; checked.len()];
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                self.table,
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        self.with_connection(cx, async |conn| {
            let mut query = sqlx::query(&sql);
            for (_, value) in &checked {
                query = bind(query, value)?;
            }
            let result = Self::write(conn, query, commit).await?;
            Ok(RecordId::new(result.last_insert_rowid()))
        })
        .await
    }

    /// Overwrite the given fields of one record.
    ///
    /// Fails with [`ErrorKind::NotFound`] when no record has that identity.
    #[instrument(skip(self, cx, fields), fields(table = %self.table, id = %id, fields = fields.len()))]
    pub async fn update(&self, cx: &Context, id: RecordId, fields: &Fields, commit: bool) -> Result<()> {
        if fields.is_empty() {
            exn::bail!(ErrorKind::invalid("no fields to update"));
        }
        let checked = self.validate(fields)?;
        let assignments = checked.iter().map(|(column, _)| format!("\"{}\" = ?", column.name)).collect::<Vec<_>>();
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?",
            self.table,
            assignments.join(", "),
            self.schema.identity
        );
        self.with_connection(cx, async |conn| {
            let mut query = sqlx::query(&sql);
            for (_, value) in &checked {
                query = bind(query, value)?;
            }
            let result = Self::write(conn, query.bind(id.get()), commit).await?;
            if result.rows_affected() == 0 {
                exn::bail!(ErrorKind::NotFound(id.get()));
            }
            Ok(())
        })
        .await
    }

    /// Delete one record, returning whether it existed. Its list and tag
    /// rows go with it.
    #[instrument(skip(self, cx), fields(table = %self.table, id = %id))]
    pub async fn delete(&self, cx: &Context, id: RecordId, commit: bool) -> Result<bool> {
        let sql = format!("DELETE FROM \"{}\" WHERE \"{}\" = ?", self.table, self.schema.identity);
        self.with_connection(cx, async |conn| {
            let result = Self::write(conn, sqlx::query(&sql).bind(id.get()), commit).await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Every record whose lookup column equals `value`, in identity order.
    #[instrument(level = "debug", skip(self, cx, value), fields(table = %self.table))]
    pub async fn fetch_many(&self, cx: &Context, column: &str, value: impl Into<Value>) -> Result<Vec<Record>> {
        let column = self.schema.lookup(column)?;
        let value = value.into();
        Self::check_kind(column, &value)?;
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" = ? ORDER BY \"{}\"",
            self.schema.select_list(),
            self.table,
            column.name,
            self.schema.identity
        );
        self.with_connection(cx, async |conn| {
            let rows = classify(bind(sqlx::query(&sql), &value)?.fetch_all(conn.raw()).await)?;
            rows.iter()
                .map(|row| {
                    let values = self
                        .schema
                        .columns
                        .iter()
                        .map(|column| Ok((column.name, decode(row, column)?)))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Record::new(values))
                })
                .collect()
        })
        .await
    }

    /// The single record whose lookup column equals `value`.
    ///
    /// `None` when nothing matches; [`ErrorKind::AmbiguousResult`] when more
    /// than one record does.
    pub async fn fetch_one(&self, cx: &Context, column: &str, value: impl Into<Value>) -> Result<Option<Record>> {
        let lookup = self.schema.lookup(column)?;
        let mut records = self.fetch_many(cx, column, value).await?;
        match records.len() {
            0 | 1 => Ok(records.pop()),
            matches => exn::bail!(ErrorKind::AmbiguousResult { column: lookup.name, matches }),
        }
    }

    /// Every value of one column, in identity order.
    #[instrument(level = "debug", skip(self, cx), fields(table = %self.table))]
    pub async fn fetch_column(&self, cx: &Context, name: &str) -> Result<Vec<Value>> {
        let column = self.schema.readable(name)?;
        let sql = format!(
            "SELECT \"{}\" FROM \"{}\" ORDER BY \"{}\"",
            column.name, self.table, self.schema.identity
        );
        self.with_connection(cx, async |conn| {
            let rows = classify(sqlx::query(&sql).fetch_all(conn.raw()).await)?;
            rows.iter().map(|row| decode(row, column)).collect()
        })
        .await
    }

    /// Commit the context's deferred transaction, if any.
    pub async fn commit(&self, cx: &Context) -> Result<()> {
        let conn = cx.connection().await?;
        let mut conn = conn.lock().await;
        conn.commit().await
    }

    /// Discard the context's deferred transaction, if any.
    pub async fn rollback(&self, cx: &Context) -> Result<()> {
        let conn = cx.connection().await?;
        let mut conn = conn.lock().await;
        conn.rollback().await
    }
}
