//! Per-context resources: one logger and one connection for each concurrent
//! execution context.
//!
//! A [`ResourceMultiplexer`] is owned by whoever runs the contexts (one per
//! plugin) and handed to them explicitly. [`ResourceMultiplexer::enter`]
//! starts a context; both resources are created lazily on first access,
//! cached for the context's lifetime, and released when its [`Context`] is
//! dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::Span;

use crate::db::{Connection, Connector};
use crate::error::Result;

/// A context's connection. Queries lock it for their duration; the context
/// itself is the only user, so the lock is uncontended in practice.
pub type SharedConnection = Arc<AsyncMutex<Connection>>;

/// Identity of one execution context within a multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A uniquely named logging sink.
///
/// Events emitted inside [`span`](Self::span) carry the logger name, so
/// output from concurrent contexts of the same plugin can be told apart.
#[derive(Debug, Clone)]
pub struct ContextLogger {
    name: Arc<str>,
    span: Span,
}

impl ContextLogger {
    fn new(name: String) -> Self {
        let span = tracing::info_span!("context", logger = %name);
        Self { name: name.into(), span }
    }

    /// Dotted logger name, `<base>.Thread-<n>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[derive(Default)]
struct Entry {
    logger: OnceLock<ContextLogger>,
    connection: OnceCell<SharedConnection>,
}

struct Inner {
    base_path: String,
    connector: Connector,
    next_logger: AtomicU64,
    next_context: AtomicU64,
    entries: Mutex<HashMap<ContextId, Arc<Entry>>>,
}

/// Hands each execution context its own logger and database connection.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ResourceMultiplexer {
    inner: Arc<Inner>,
}

impl fmt::Debug for ResourceMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMultiplexer")
            .field("base_path", &self.inner.base_path)
            .field("active_contexts", &self.active_contexts())
            .finish_non_exhaustive()
    }
}

impl ResourceMultiplexer {
    pub fn new(base_path: impl Into<String>, connector: Connector) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_path: base_path.into(),
                connector,
                next_logger: AtomicU64::new(1),
                next_context: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.inner.base_path
    }

    /// Start a new execution context. Its resources are released when the
    /// returned handle is dropped.
    pub fn enter(&self) -> Context {
        let id = ContextId(self.inner.next_context.fetch_add(1, Ordering::Relaxed));
        Context { id, resources: self.clone() }
    }

    // The map lock is only ever held for a lookup or insert, never across an
    // await, so a poisoned lock still holds consistent data.
    fn entries(&self) -> MutexGuard<'_, HashMap<ContextId, Arc<Entry>>> {
        self.inner.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, id: ContextId) -> Arc<Entry> {
        Arc::clone(self.entries().entry(id).or_default())
    }

    /// The context's logger, created on first access.
    pub fn logger(&self, id: ContextId) -> ContextLogger {
        let entry = self.entry(id);
        entry
            .logger
            .get_or_init(|| {
                let index = self.inner.next_logger.fetch_add(1, Ordering::Relaxed);
                ContextLogger::new(format!("{}.Thread-{index}", self.inner.base_path))
            })
            .clone()
    }

    /// The context's connection, opened on first access.
    ///
    /// Concurrent first accesses from the same context share one connection
    /// attempt. A failed attempt is not cached, so a later call tries again.
    pub async fn connection(&self, id: ContextId) -> Result<SharedConnection> {
        let entry = self.entry(id);
        let conn = entry
            .connection
            .get_or_try_init(|| async {
                let conn = self.inner.connector.connect().await?;
                tracing::debug!(context = %id, base = %self.inner.base_path, "Opened context connection");
                Ok::<_, crate::error::Error>(Arc::new(AsyncMutex::new(conn)))
            })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Drop the context's entry and close its connection in the background.
    /// A deferred transaction still pending on the connection is rolled back
    /// by the close.
    ///
    /// A connection someone still holds a handle to is left open; it closes
    /// when the last handle is dropped.
    pub fn release(&self, id: ContextId) {
        let Some(entry) = self.entries().remove(&id) else {
            return;
        };
        let conn = match Arc::try_unwrap(entry) {
            Ok(entry) => entry.connection.into_inner(),
            Err(entry) => entry.connection.get().cloned(),
        };
        let Some(conn) = conn else {
            return;
        };
        let base = &self.inner.base_path;
        match Arc::try_unwrap(conn) {
            Ok(conn) => {
                let conn = conn.into_inner();
                if conn.in_transaction() {
                    tracing::warn!(context = %id, base = %base, "Context ended with an uncommitted transaction; rolling back");
                }
                match Handle::try_current() {
                    Ok(runtime) => drop(runtime.spawn(conn.close())),
                    Err(_) => drop(conn),
                }
            },
            Err(conn) => {
                if conn.try_lock().is_ok_and(|conn| conn.in_transaction()) {
                    tracing::warn!(context = %id, base = %base, "Context ended with an uncommitted transaction");
                }
                tracing::debug!(context = %id, base = %base, "Connection outlives its context");
            },
        }
    }

    /// Number of contexts currently holding resources.
    pub fn active_contexts(&self) -> usize {
        self.entries().len()
    }
}

/// Handle on one execution context. Dropping it ends the context.
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    resources: ResourceMultiplexer,
}

impl Context {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn logger(&self) -> ContextLogger {
        self.resources.logger(self.id)
    }

    pub async fn connection(&self) -> Result<SharedConnection> {
        self.resources.connection(self.id).await
    }

    pub fn resources(&self) -> &ResourceMultiplexer {
        &self.resources
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.resources.release(self.id);
    }
}
