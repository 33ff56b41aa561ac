//! Plugin scheduling.
//!
//! A [`Schedule`] assigns every plugin a distinct startup offset and a re-run
//! interval. The [`Scheduler`] mounts each plugin, starts them one base unit
//! apart, and keeps re-running them until the shared
//! [`RunStatus`](trawl_plugin::RunStatus) says stop. A failing or panicking
//! plugin is logged and never takes the others down.

pub mod error;
mod runner;
mod schedule;
mod signal;

pub use crate::runner::{DEFAULT_BASE_UNIT, DEFAULT_SHUTDOWN_GRACE, Scheduler};
pub use crate::schedule::{Schedule, ScheduleEntry, days, hours, minutes};
pub use crate::signal::{INTERRUPTED_EXIT_CODE, install_interrupt_handler};
