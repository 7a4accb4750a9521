//! Worker registry - the explicit list of built-in workers.
//!
//! Workers are grouped by controller. Each entry is a constructor taking
//! the shared [`WorkerContext`]; adding a worker means adding it here.

use std::sync::Arc;

use anyhow::{Context, Result};
use hubsync::bus::BusClient;
use hubsync::config::AgentConfig;
use tracing::warn;

use crate::controller::Controller;
use crate::runners::{DynamicWorker, EventWorker, OneShotWorker, PollingWorker};
use crate::worker::Worker;
use crate::workers::{battery, commands, external_ip, latency, system, version};

/// Everything a worker constructor may draw on.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<AgentConfig>,
    pub http_client: reqwest::Client,
    pub bus: Option<BusClient>,
}

impl WorkerContext {
    pub fn new(config: Arc<AgentConfig>, bus: Option<BusClient>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("hubsync-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            http_client,
            bus,
        })
    }
}

pub type WorkerConstructor = fn(&WorkerContext) -> Result<Arc<dyn Worker>>;

pub struct ControllerSpec {
    pub id: &'static str,
    pub workers: Vec<WorkerConstructor>,
}

/// Returns all built-in controllers.
pub fn controllers() -> Vec<ControllerSpec> {
    vec![
        ControllerSpec {
            id: "agent",
            workers: vec![agent_version, external_ip, connection_latency],
        },
        ControllerSpec {
            id: "system",
            workers: vec![memory_usage, load_average, battery_sensors],
        },
        ControllerSpec {
            id: "commands",
            workers: vec![remote_commands],
        },
    ]
}

/// Builds every controller. A worker whose constructor fails is left out.
pub fn build_controllers(specs: Vec<ControllerSpec>, ctx: &WorkerContext) -> Vec<Arc<Controller>> {
    specs
        .into_iter()
        .map(|spec| {
            let workers = spec
                .workers
                .iter()
                .filter_map(|construct| match construct(ctx) {
                    Ok(worker) => Some(worker),
                    Err(e) => {
                        warn!(controller = spec.id, error = %e, "Failed to construct worker");
                        None
                    }
                })
                .collect();
            Arc::new(Controller::new(spec.id, workers))
        })
        .collect()
}

fn agent_version(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(version::WORKER_ID);
    Ok(Arc::new(OneShotWorker::new(version::VersionCollector::new(), &prefs)))
}

fn external_ip(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(external_ip::WORKER_ID);
    let poller = external_ip::ExternalIpPoller::new(ctx.http_client.clone());
    Ok(Arc::new(PollingWorker::new(poller, &prefs)))
}

fn connection_latency(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(latency::WORKER_ID);
    let poller = latency::LatencyPoller::new(ctx.http_client.clone(), &ctx.config.hub.webhook_url)?;
    Ok(Arc::new(PollingWorker::new(poller, &prefs)))
}

fn memory_usage(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(system::MEMORY_WORKER_ID);
    Ok(Arc::new(PollingWorker::new(system::MemoryPoller::default(), &prefs)))
}

fn load_average(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(system::LOAD_WORKER_ID);
    Ok(Arc::new(PollingWorker::new(system::LoadPoller::default(), &prefs)))
}

fn battery_sensors(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(battery::WORKER_ID);
    let monitor = battery::BatteryMonitor::from_prefs(&prefs);
    Ok(Arc::new(DynamicWorker::new(monitor, &prefs)))
}

fn remote_commands(ctx: &WorkerContext) -> Result<Arc<dyn Worker>> {
    let prefs = ctx.config.worker_prefs(commands::WORKER_ID);
    let source = commands::CommandSource::new(ctx.bus.clone(), ctx.config.commands.clone());
    Ok(Arc::new(EventWorker::new(source, &prefs)))
}
