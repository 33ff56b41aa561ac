//! Connection targets and per-context connections.

use exn::ResultExt;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection as _, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;
use trawl_config::DatabaseConfig;

use crate::error::{ErrorKind, Result, classify};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Opens database connections, preferring the primary target and falling back
/// to the secondary one when the primary cannot be reached.
///
/// Each execution context owns exactly one connection, so unlike a pool this
/// hands out plain connections that the caller keeps for the context's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Connector {
    primary: SqliteConnectOptions,
    fallback: Option<SqliteConnectOptions>,
}

impl Connector {
    /// Connector with a single target. The connection policy (journal mode,
    /// foreign keys, and so on) is applied on top of the given options.
    pub fn new(primary: SqliteConnectOptions) -> Self {
        Self {
            primary: Self::policy(primary, DEFAULT_BUSY_TIMEOUT),
            fallback: None,
        }
    }

    /// Add a secondary target tried when the primary fails to open.
    pub fn with_fallback(mut self, fallback: SqliteConnectOptions) -> Self {
        self.fallback = Some(Self::policy(fallback, DEFAULT_BUSY_TIMEOUT));
        self
    }

    /// Connector for a database file on the local filesystem, created if
    /// missing.
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self::new(SqliteConnectOptions::new().filename(path).create_if_missing(true))
    }

    /// Build a connector from the `database` configuration section.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let timeout = config.busy_timeout();
        let primary = Self::parse(&config.url)?;
        let fallback = config.fallback_url.as_deref().map(Self::parse).transpose()?;
        Ok(Self {
            primary: Self::policy(primary, timeout),
            fallback: fallback.map(|options| Self::policy(options, timeout)),
        })
    }

    fn parse(url: &str) -> Result<SqliteConnectOptions> {
        // The driver reads anything without a `sqlite:` scheme as a file name.
        if !url.starts_with("sqlite:") {
            exn::bail!(ErrorKind::invalid(format!("database url '{url}' is not a sqlite: url")));
        }
        SqliteConnectOptions::from_str(url).or_raise(|| ErrorKind::invalid(format!("database url '{url}'")))
    }

    /// Connection policy shared by every target.
    fn policy(options: SqliteConnectOptions, busy_timeout: Duration) -> SqliteConnectOptions {
        options
            // Writers on different connections only wait on each other at
            // commit time under WAL.
            .journal_mode(SqliteJournalMode::Wal)
            // Cascading deletes of list and tag rows depend on this.
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Dozens of plugins write to the same file; too small a timeout
            // surfaces as SQLITE_BUSY.
            .busy_timeout(busy_timeout)
            .auto_vacuum(SqliteAutoVacuum::None)
            // Statement logging is left to the store's own spans.
            .disable_statement_logging()
    }

    /// Open a new connection, trying the primary target first.
    ///
    /// A failing primary is logged and the fallback (if any) is tried. When
    /// every target fails the last driver error is attached to
    /// [`ErrorKind::ConnectionUnavailable`].
    #[instrument(level = "debug", skip(self))]
    pub async fn connect(&self) -> Result<Connection> {
        let err = match Self::open(&self.primary).await {
            Ok(conn) => return Ok(conn),
            Err(err) => err,
        };
        let Some(fallback) = &self.fallback else {
            return Err(err).or_raise(|| ErrorKind::ConnectionUnavailable);
        };
        tracing::warn!(error = %err, "Primary database unavailable, trying fallback");
        Self::open(fallback).await.or_raise(|| ErrorKind::ConnectionUnavailable)
    }

    async fn open(options: &SqliteConnectOptions) -> sqlx::Result<Connection> {
        let mut conn = options.connect().await?;
        Self::apply_pragmas(&mut conn).await?;
        Ok(Connection { inner: conn, pending: false })
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
                PRAGMA mmap_size = 33554432;
                PRAGMA analysis_limit = 1000;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }
}

/// One context's database connection.
///
/// Writes made with `commit = false` open a deferred transaction that stays
/// pending on the connection until a later committing write,
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
#[derive(Debug)]
pub struct Connection {
    inner: SqliteConnection,
    pending: bool,
}

impl Connection {
    /// Whether a deferred transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.pending
    }

    /// Raw driver connection, for queries outside the record store.
    pub fn raw(&mut self) -> &mut SqliteConnection {
        &mut self.inner
    }

    pub(crate) async fn begin(&mut self) -> Result<()> {
        if !self.pending {
            classify(sqlx::query("BEGIN").execute(&mut self.inner).await)?;
            self.pending = true;
        }
        Ok(())
    }

    /// Commit the deferred transaction, if any.
    pub async fn commit(&mut self) -> Result<()> {
        if self.pending {
            classify(sqlx::query("COMMIT").execute(&mut self.inner).await)?;
            self.pending = false;
        }
        Ok(())
    }

    /// Discard the deferred transaction, if any.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.pending {
            // Whatever happens the transaction is gone afterwards.
            self.pending = false;
            classify(sqlx::query("ROLLBACK").execute(&mut self.inner).await)?;
        }
        Ok(())
    }

    /// Close the connection, letting SQLite update its planner statistics.
    pub async fn close(mut self) {
        _ = sqlx::query("PRAGMA optimize").execute(&mut self.inner).await;
        _ = self.inner.close().await;
    }
}
