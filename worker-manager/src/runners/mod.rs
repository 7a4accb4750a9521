//! Runner variants implementing the [`Worker`](crate::worker::Worker)
//! capability set.
//!
//! - [`PollingWorker`] - samples a [`Poller`] on an interval
//! - [`EventWorker`] - forwards an [`EventSource`] subscription
//! - [`OneShotWorker`] - reports a [`Collector`] once per activation
//! - [`DynamicWorker`] - supervises a [`ResourceMonitor`]'s changing resource set

pub mod dynamic;
pub mod event;
pub mod oneshot;
pub mod polling;

pub use dynamic::{DynamicWorker, ResourceEvent, ResourceMonitor};
pub use event::{EventSource, EventWorker};
pub use oneshot::{Collector, OneShotWorker};
pub use polling::{Poller, PollingWorker};
