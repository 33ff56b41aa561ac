//! Plugin contract and registration.
//!
//! A [`Plugin`] is an opaque collection unit. The core only needs its
//! identity attributes and a repeatable [`run`](Plugin::run) entry point.
//! [`PluginRegistry`] collects plugins of one kind under unique table keys,
//! and [`MountedPlugin`] binds a plugin to its own
//! [`ResourceMultiplexer`](trawl_store::ResourceMultiplexer) and
//! [`RecordStore`](trawl_store::RecordStore) so it can be invoked.

mod domains;
pub mod error;
mod mount;
mod plugin;
mod registry;
mod status;

pub use crate::domains::known_domains;
pub use crate::mount::MountedPlugin;
pub use crate::plugin::{Invocation, Plugin, PluginHandle, PluginKind};
pub use crate::registry::PluginRegistry;
pub use crate::status::{Interrupt, RunStatus};
pub use async_trait::async_trait;
