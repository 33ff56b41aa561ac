//! Binding a plugin to its resources.

use exn::ResultExt;
use std::fmt;
use tracing::Instrument;
use trawl_store::{Connector, RecordStore, ResourceMultiplexer, TableName};

use crate::error::{ErrorKind, Result};
use crate::plugin::{Invocation, Plugin, PluginHandle};
use crate::status::RunStatus;

/// Check the attributes every plugin must declare and return its table
/// name.
pub(crate) fn validate(plugin: &dyn Plugin) -> Result<TableName> {
    let name = plugin.name();
    if name.trim().is_empty() {
        exn::bail!(ErrorKind::MissingAttribute { plugin: String::new(), attribute: "name" });
    }
    if plugin.logger_path().trim().is_empty() {
        exn::bail!(ErrorKind::MissingAttribute { plugin: name.to_string(), attribute: "logger path" });
    }
    TableName::new(plugin.table_key()).or_raise(|| ErrorKind::InvalidTableKey(name.to_string()))
}

/// A plugin together with its resource multiplexer and record store, ready
/// to be invoked any number of times (concurrently, if need be).
#[derive(Clone)]
pub struct MountedPlugin {
    plugin: PluginHandle,
    resources: ResourceMultiplexer,
    store: RecordStore,
}

impl fmt::Debug for MountedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedPlugin")
            .field("name", &self.plugin.name())
            .field("table", self.store.table())
            .finish_non_exhaustive()
    }
}

impl MountedPlugin {
    pub fn new(plugin: PluginHandle, connector: Connector) -> Result<Self> {
        let table = validate(plugin.as_ref())?;
        let resources = ResourceMultiplexer::new(plugin.logger_path(), connector);
        let store = RecordStore::records(table);
        Ok(Self { plugin, resources, store })
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn plugin(&self) -> &PluginHandle {
        &self.plugin
    }

    pub fn resources(&self) -> &ResourceMultiplexer {
        &self.resources
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run the plugin once in a fresh execution context.
    ///
    /// Everything the plugin logs carries the context's logger name. The
    /// context, and with it the connection, is released when the run ends.
    pub async fn invoke(&self, status: &RunStatus) -> Result<()> {
        let cx = self.resources.enter();
        let span = cx.logger().span().clone();
        let invocation = Invocation::new(&cx, &self.store, status);
        async {
            tracing::debug!("Invocation started");
            let result = self.plugin.run(&invocation).await;
            if let Err(err) = &result {
                tracing::debug!(error = %err, "Invocation returned an error");
            }
            result
        }
        .instrument(span)
        .await
    }
}
