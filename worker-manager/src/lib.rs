//! Worker manager for the hubsync agent.
//!
//! Workers produce entities (sensors and events) about the host. This crate
//! runs them, groups them under controllers and merges everything they
//! produce into one stream for the sync engine.
//!
//! # Architecture
//!
//! ```text
//!  Polling / Event / OneShot / Dynamic workers
//!          ↓ (one EntityStream per activation)
//! ┌─────────────────────────────────────────┐
//! │       Controller (per group)             │
//! │  - start/stop individual workers         │
//! │  - merge worker streams                  │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       WorkerManager                      │
//! │  - owns the cancellation root            │
//! │  - single entity intake                  │
//! └─────────────────────────────────────────┘
//!          ↓
//!   hubsync::SyncEngine
//! ```
//!
//! # Writing a Worker
//!
//! Most workers implement one of the runner traits and get wrapped in the
//! matching runner, which handles tasks, channels and cancellation:
//!
//! ```no_run
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use hubsync::config::WorkerPreferences;
//! use hubsync::Entity;
//! use std::time::Duration;
//! use worker_manager::runners::{Poller, PollingWorker};
//!
//! struct Uptime;
//!
//! #[async_trait]
//! impl Poller for Uptime {
//!     fn id(&self) -> &str {
//!         "uptime"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "System uptime"
//!     }
//!
//!     fn default_interval(&self) -> Duration {
//!         Duration::from_secs(60)
//!     }
//!
//!     async fn poll(&self) -> Result<Vec<Entity>> {
//!         Ok(vec![Entity::sensor("uptime", "Uptime", 42).with_unit("s")])
//!     }
//! }
//!
//! let worker = PollingWorker::new(Uptime, &WorkerPreferences::default());
//! ```

pub mod api;
pub mod controller;
pub mod manager;
pub mod merge;
pub mod registry;
pub mod runners;
pub mod worker;
pub mod workers;

pub use controller::{Controller, ControllerError, WorkerStatus};
pub use manager::{ControllerStatus, WorkerManager};
pub use worker::{EntityStream, Worker, WorkerDescriptor, WorkerKind};
