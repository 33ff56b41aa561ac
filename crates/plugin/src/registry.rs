//! Startup-time plugin registration.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

use crate::error::{ErrorKind, Result};
use crate::mount::validate;
use crate::plugin::{PluginHandle, PluginKind};

/// Plugins of one [`PluginKind`], keyed by table key.
///
/// Table keys name SQLite tables, so they are compared case-insensitively:
/// `novels` and `Novels` claim the same key.
///
/// Populated explicitly at startup. A rejected registration leaves the
/// registry untouched, so the caller may skip the offending plugin and carry
/// on, or abort.
#[derive(Clone)]
pub struct PluginRegistry {
    kind: PluginKind,
    plugins: BTreeMap<String, PluginHandle>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("kind", &self.kind)
            .field("table_keys", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new(kind: PluginKind) -> Self {
        Self { kind, plugins: BTreeMap::new() }
    }

    /// Build a registry from a list of plugins, failing on the first plugin
    /// that cannot be registered.
    pub fn from_plugins(kind: PluginKind, plugins: impl IntoIterator<Item = PluginHandle>) -> Result<Self> {
        let mut registry = Self::new(kind);
        for plugin in plugins {
            registry.register(plugin)?;
        }
        Ok(registry)
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Add a plugin under its table key.
    pub fn register(&mut self, plugin: PluginHandle) -> Result<()> {
        if plugin.kind() != Some(self.kind) {
            exn::bail!(ErrorKind::UnrecognizedKind(plugin.name().to_string()));
        }
        let table = validate(plugin.as_ref())?;
        match self.plugins.entry(table.as_str().to_ascii_lowercase()) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    table_key = %table,
                    plugin = plugin.name(),
                    registered = existing.get().name(),
                    "Two plugins claim the same table key"
                );
                exn::bail!(ErrorKind::DuplicateRegistration(table.as_str().to_string()))
            },
            Entry::Vacant(slot) => {
                tracing::debug!(table_key = %table, plugin = plugin.name(), kind = %self.kind, "Plugin registered");
                slot.insert(plugin);
                Ok(())
            },
        }
    }

    pub fn get(&self, table_key: &str) -> Option<&PluginHandle> {
        self.plugins.get(&table_key.to_ascii_lowercase())
    }

    pub fn contains(&self, table_key: &str) -> bool {
        self.get(table_key).is_some()
    }

    /// Registered table keys as the plugins declare them, sorted
    /// case-insensitively.
    pub fn table_keys(&self) -> impl Iterator<Item = &str> {
        self.plugins.values().map(|plugin| plugin.table_key())
    }

    /// Registered plugins in table-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PluginHandle)> {
        self.plugins.values().map(|plugin| (plugin.table_key(), plugin))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
