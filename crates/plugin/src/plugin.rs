//! The capability contract every collection unit implements.

use async_trait::async_trait;
use derive_more::Display;
use std::sync::Arc;
use trawl_store::{Context, ContextLogger, RecordStore};

use crate::error::Result;
use crate::status::RunStatus;

/// Marker a plugin declares so that registries collecting one family of
/// plugins (for cross-cutting lookups such as the known-domain report) can
/// recognize it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    /// Scrapes text content from a site.
    #[display("text-scraper")]
    TextScraper,
    /// Tracks a catalogue of series and their releases.
    #[display("series-monitor")]
    SeriesMonitor,
    /// Long-lived listener (chat bots and the like); never returns while
    /// running.
    #[display("listener")]
    Listener,
}

/// A collection unit.
///
/// [`run`](Self::run) is the only entry point. It may be called any number of
/// times and must leave the plugin ready for the next call; it may also run
/// until [`RunStatus`] says to stop.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable, unique identifier.
    fn name(&self) -> &str;

    /// Dotted logger base path; each invocation logs as
    /// `<logger_path>.Thread-<n>`.
    fn logger_path(&self) -> &str;

    /// Table prefix for the plugin's records, and its registry key.
    fn table_key(&self) -> &str;

    fn kind(&self) -> Option<PluginKind> {
        None
    }

    /// Base URL(s) of the site the plugin collects from.
    fn base_urls(&self) -> &[&str] {
        &[]
    }

    /// Other domains the plugin understands links to.
    fn scanned_domains(&self) -> &[&str] {
        &[]
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<()>;
}

/// Shared handle to a plugin.
pub type PluginHandle = Arc<dyn Plugin>;

/// Everything one plugin invocation gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub(crate) context: &'a Context,
    pub(crate) store: &'a RecordStore,
    pub(crate) status: &'a RunStatus,
}

impl<'a> Invocation<'a> {
    pub fn new(context: &'a Context, store: &'a RecordStore, status: &'a RunStatus) -> Self {
        Self { context, store, status }
    }

    /// The invocation's execution context; pass it to every store call.
    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn store(&self) -> &'a RecordStore {
        self.store
    }

    pub fn status(&self) -> &'a RunStatus {
        self.status
    }

    pub fn logger(&self) -> ContextLogger {
        self.context.logger()
    }
}
