//! Chime: offline-first reminder delivery core.
//!
//! Chime keeps a device's tasks consistent with a remote backend across
//! unreliable connectivity, and delivers each reminder through the best
//! available channel when its scheduled instant arrives.
//!
//! # Architecture
//!
//! Two subsystems share a durable key-value store:
//! - **Sync**: every local mutation is appended to a persistent FIFO queue
//!   and drained toward the backend once the [`net::NetworkMonitor`]
//!   reports connectivity; edits are never silently lost.
//! - **Delivery**: a periodic [`scheduler::Scheduler`] tick scans for due
//!   tasks and hands each firing to the
//!   [`delivery::router::DeliveryRouter`], which picks voice call or push
//!   notification, defers through quiet hours, and escalates total
//!   failures into a backoff retry queue.
//!
//! [`ChimeCore`] wires both subsystems together for the host application.

pub mod backend;
pub mod config;
pub mod core;
pub mod delivery;
pub mod error;
pub mod net;
pub mod profile;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod task;

#[cfg(test)]
pub mod test_utils;

pub use backend::{HttpBackend, RemoteBackend};
pub use config::ChimeConfig;
pub use crate::core::{ChimeCore, TaskDeliveryStatus};
pub use delivery::{DeliveryMethod, DeliveryOutcome};
pub use error::{ChimeError, Result};
pub use profile::{QuietHours, UserDeliveryProfile};
pub use sync::DrainSummary;
pub use task::{Note, SyncStatus, Task};
