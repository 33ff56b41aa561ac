//! List and tag membership for records.
//!
//! A record sits in at most one named list and may carry any number of
//! distinct tags. List and tag names are registered in their own tables and
//! compare case-insensitively; links store the registered spelling.
//!
//! Membership writes join a pending deferred transaction on the context's
//! connection when there is one, and commit on their own otherwise.

use sqlx::sqlite::SqliteQueryResult;
use tracing::instrument;

use crate::context::Context;
use crate::db::Connection;
use crate::error::{ErrorKind, Result, classify};
use crate::models::RecordId;
use crate::repo::RecordStore;

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

impl RecordStore {
    async fn ensure_exists(&self, conn: &mut Connection, id: RecordId) -> Result<()> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?", self.table(), self.schema().identity);
        let count: i64 = classify(sqlx::query_scalar::<_, i64>(&sql).bind(id.get()).fetch_one(conn.raw()).await)?;
        if count == 0 {
            exn::bail!(ErrorKind::NotFound(id.get()));
        }
        Ok(())
    }

    async fn apply(conn: &mut Connection, query: SqliteQuery<'_>) -> Result<SqliteQueryResult> {
        let commit = !conn.in_transaction();
        Self::write(conn, query, commit).await
    }

    /// Register a name (if new) and link it to a record as one unit.
    async fn register_and_link(conn: &mut Connection, register: SqliteQuery<'_>, link: SqliteQuery<'_>) -> Result<()> {
        let joined = conn.in_transaction();
        conn.begin().await?;
        let mut result = classify(register.execute(conn.raw()).await).map(drop);
        if result.is_ok() {
            result = classify(link.execute(conn.raw()).await).map(drop);
        }
        match result {
            Ok(()) if !joined => conn.commit().await,
            Ok(()) => Ok(()),
            Err(err) => {
                if !joined {
                    _ = conn.rollback().await;
                }
                Err(err)
            },
        }
    }

    /// Put a record in the named list, registering the list if needed.
    ///
    /// A record already in a list fails with [`ErrorKind::Constraint`];
    /// clear it first to move it.
    #[instrument(skip(self, cx), fields(table = %self.table()))]
    pub async fn assign_list(&self, cx: &Context, id: RecordId, name: &str) -> Result<()> {
        let register = format!("INSERT OR IGNORE INTO \"{}\" (list_name) VALUES (?)", self.table().lists());
        let link = format!(
            "INSERT INTO \"{}\" (series_id, list_name) SELECT ?, list_name FROM \"{}\" WHERE list_name = ?",
            self.table().series_list(),
            self.table().lists()
        );
        self.with_connection(cx, async |conn| {
            self.ensure_exists(conn, id).await?;
            let register = sqlx::query(&register).bind(name);
            let link = sqlx::query(&link).bind(id.get()).bind(name);
            Self::register_and_link(conn, register, link).await
        })
        .await
    }

    /// The list a record is in, if any.
    pub async fn list_of(&self, cx: &Context, id: RecordId) -> Result<Option<String>> {
        let sql = format!("SELECT list_name FROM \"{}\" WHERE series_id = ?", self.table().series_list());
        self.with_connection(cx, async |conn| {
            classify(sqlx::query_scalar::<_, String>(&sql).bind(id.get()).fetch_optional(conn.raw()).await)
        })
        .await
    }

    /// Take a record out of its list, returning whether it was in one.
    pub async fn clear_list(&self, cx: &Context, id: RecordId) -> Result<bool> {
        let sql = format!("DELETE FROM \"{}\" WHERE series_id = ?", self.table().series_list());
        self.with_connection(cx, async |conn| {
            Ok(Self::apply(conn, sqlx::query(&sql).bind(id.get())).await?.rows_affected() > 0)
        })
        .await
    }

    /// Every registered list name, sorted.
    pub async fn lists(&self, cx: &Context) -> Result<Vec<String>> {
        let sql = format!("SELECT list_name FROM \"{}\" ORDER BY list_name", self.table().lists());
        self.with_connection(cx, async |conn| classify(sqlx::query_scalar::<_, String>(&sql).fetch_all(conn.raw()).await))
            .await
    }

    /// Tag a record, registering the tag if needed.
    ///
    /// Tagging a record twice with the same tag fails with
    /// [`ErrorKind::Constraint`].
    #[instrument(skip(self, cx), fields(table = %self.table()))]
    pub async fn add_tag(&self, cx: &Context, id: RecordId, tag: &str) -> Result<()> {
        let register = format!("INSERT OR IGNORE INTO \"{}\" (tag_name) VALUES (?)", self.table().tags());
        let link = format!(
            "INSERT INTO \"{}\" (series_id, tag) SELECT ?, tag_name FROM \"{}\" WHERE tag_name = ?",
            self.table().series_tags(),
            self.table().tags()
        );
        self.with_connection(cx, async |conn| {
            self.ensure_exists(conn, id).await?;
            let register = sqlx::query(&register).bind(tag);
            let link = sqlx::query(&link).bind(id.get()).bind(tag);
            Self::register_and_link(conn, register, link).await
        })
        .await
    }

    /// A record's tags, sorted.
    pub async fn tags_of(&self, cx: &Context, id: RecordId) -> Result<Vec<String>> {
        let sql = format!("SELECT tag FROM \"{}\" WHERE series_id = ? ORDER BY tag", self.table().series_tags());
        self.with_connection(cx, async |conn| {
            classify(sqlx::query_scalar::<_, String>(&sql).bind(id.get()).fetch_all(conn.raw()).await)
        })
        .await
    }

    /// Remove one tag from a record, returning whether it was there.
    pub async fn remove_tag(&self, cx: &Context, id: RecordId, tag: &str) -> Result<bool> {
        let sql = format!("DELETE FROM \"{}\" WHERE series_id = ? AND tag = ?", self.table().series_tags());
        self.with_connection(cx, async |conn| {
            Ok(Self::apply(conn, sqlx::query(&sql).bind(id.get()).bind(tag)).await?.rows_affected() > 0)
        })
        .await
    }
}
