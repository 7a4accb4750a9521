use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hubsync::bus::{BusClient, StatePublisher};
use hubsync::config;
use hubsync::hub::{HttpHub, RemoteConfigCache};
use hubsync::push::PushChannel;
use hubsync::{Registry, SyncEngine, Tracker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker_manager::api::{create_router, ApiState};
use worker_manager::registry::{build_controllers, controllers, WorkerContext};
use worker_manager::WorkerManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worker_manager=info,hubsync=info".into()),
        )
        .init();

    info!("hubsync agent starting...");

    let config_path = config::config_path();
    let mut agent_config = config::load_or_default(&config_path)?;
    agent_config.apply_env();
    let agent_config = Arc::new(agent_config);

    info!(
        config = %config_path.display(),
        webhook_url = %agent_config.hub.webhook_url,
        registry = %agent_config.registry.path,
        device = %agent_config.device.id,
        "Configuration loaded"
    );

    // Registry
    let registry = Arc::new(
        Registry::open(&agent_config.registry.path).context("Failed to open registry")?,
    );
    if config::reset_requested() {
        registry.reset().context("Failed to reset registry")?;
        info!("Registry reset");
    }
    info!(entities = registry.len(), "Registry loaded");

    // Hub transport and remote config snapshot
    let hub = Arc::new(
        HttpHub::from_config(&agent_config.hub, agent_config.retry.policy())
            .context("Failed to create hub client")?,
    );
    let remote = Arc::new(RemoteConfigCache::new(
        hub.clone(),
        Duration::from_secs(agent_config.remote_config.ttl_secs),
    ));
    let tracker = Arc::new(Tracker::new());

    // Optional NATS bus
    let bus = if agent_config.bus.enabled {
        match BusClient::connect(&agent_config.bus, &agent_config.device.id).await {
            Ok(bus) => Some(bus),
            Err(e) => {
                warn!(error = %e, "Bus unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    let mut engine = SyncEngine::new(hub, Arc::clone(&registry), remote, Arc::clone(&tracker))
        .with_max_batch(agent_config.sync.max_batch);
    if let Some(bus) = &bus {
        engine = engine.with_sink(Arc::new(StatePublisher::new(bus.clone())));
    }
    let engine = Arc::new(engine);

    // Workers
    let cancel = CancellationToken::new();
    let ctx = WorkerContext::new(Arc::clone(&agent_config), bus)?;
    let (manager, intake) = WorkerManager::new(build_controllers(controllers(), &ctx), cancel.clone());
    let manager = Arc::new(manager);

    let engine_handle = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(intake, cancel).await })
    };

    let started = manager.start().await;
    info!(workers_started = started, "Worker manager started");

    // Push notifications
    if agent_config.push.enabled {
        match agent_config.hub.token.clone() {
            Some(token) => {
                let channel = PushChannel::new(
                    agent_config.push.url.clone(),
                    token,
                    agent_config.webhook_id(),
                );
                let (tx, mut rx) = mpsc::channel(16);
                tokio::spawn(channel.run(tx, cancel.clone()));
                tokio::spawn(async move {
                    while let Some(notification) = rx.recv().await {
                        info!(
                            title = notification.title.as_deref().unwrap_or(""),
                            message = %notification.message,
                            "Notification received"
                        );
                    }
                });
            }
            None => warn!("Push notifications enabled but no hub token configured"),
        }
    }

    // Status API
    let server_handle = if agent_config.api.enabled {
        let router = create_router(ApiState {
            manager: Arc::clone(&manager),
            tracker: Arc::clone(&tracker),
        });
        let addr = format!("{}:{}", agent_config.api.bind, agent_config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind status API to {}", addr))?;
        info!(addr = %addr, "Status API listening");

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Status API server error");
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    if let Some(handle) = server_handle {
        handle.abort();
    }
    manager.shutdown().await;
    if let Err(e) = engine_handle.await {
        warn!(error = %e, "Sync engine task ended abnormally");
    }
    info!("hubsync agent stopped");

    Ok(())
}
