//! The table of plugins to run: startup offset, plugin and re-run interval.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use trawl_plugin::PluginHandle;

use crate::error::{ErrorKind, Result};

pub const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

pub const fn hours(n: u64) -> Duration {
    minutes(n * 60)
}

pub const fn days(n: u64) -> Duration {
    hours(n * 24)
}

/// One scheduled plugin.
#[derive(Clone)]
pub struct ScheduleEntry {
    /// Startup offset, in base units. Also the entry's key.
    pub offset: u32,
    pub plugin: PluginHandle,
    /// Time between the starts of consecutive invocations.
    pub interval: Duration,
}

impl fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("offset", &self.offset)
            .field("plugin", &self.plugin.name())
            .field("interval", &self.interval)
            .finish()
    }
}

/// Plugins keyed by distinct startup offsets, so first invocations are
/// staggered instead of all firing at once.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    entries: BTreeMap<u32, ScheduleEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, offset: u32, plugin: PluginHandle, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            exn::bail!(ErrorKind::InvalidInterval(offset));
        }
        if self.entries.contains_key(&offset) {
            exn::bail!(ErrorKind::DuplicateOffset(offset));
        }
        self.entries.insert(offset, ScheduleEntry { offset, plugin, interval });
        Ok(())
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, offset: u32, plugin: PluginHandle, interval: Duration) -> Result<Self> {
        self.add(offset, plugin, interval)?;
        Ok(self)
    }

    /// Keep only the entry at `offset`, or everything for `None`.
    pub fn select(mut self, offset: Option<u32>) -> Result<Self> {
        let Some(offset) = offset else {
            return Ok(self);
        };
        let entry = self.entries.remove(&offset).ok_or_else(|| exn::Exn::from(ErrorKind::UnknownOffset(offset)))?;
        Ok(Self { entries: BTreeMap::from([(offset, entry)]) })
    }

    pub fn get(&self, offset: u32) -> Option<&ScheduleEntry> {
        self.entries.get(&offset)
    }

    /// Entries in offset order.
    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
