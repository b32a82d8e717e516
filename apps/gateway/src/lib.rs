//! Omnidesk webhook gateway.
//!
//! Wires the platform adapters, the durable queue, and the shared
//! processing pipeline behind the webhook routes. NATS being down at
//! startup is survivable: the gateway degrades to direct-mode processing
//! and keeps acknowledging webhooks.

mod config;
mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::serve;
use odm_adapters::default_registry;
use odm_core::Connection;
use odm_idempotency::{
    IdempotencyConfig, IdempotencyGuard, InMemoryIdemStore, NatsKvIdemStore, SharedIdemStore,
};
use odm_pipeline::{
    DispatchGateway, HttpResponseGenerator, MessageProcessor, ResponseOrchestrator,
    SharedGenerator, StaticCredentials, UnconfiguredGenerator,
};
use odm_queue::{JetStreamQueue, SharedQueue, UnavailableQueue};
use odm_realtime::{FailingRealtime, NatsRealtimePublisher, SharedRealtime};
use odm_store::{SharedInboxStore, shared_memory_store};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use config::GatewayConfig;
pub use http::{AppState, router};

/// Starts the gateway HTTP server using the provided configuration.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let store = shared_memory_store();
    if let Some(path) = &config.connections_file {
        seed_connections(&store, path).await?;
    }
    let idem_cfg = IdempotencyConfig::from_env();

    let (queue, realtime, idem_store): (SharedQueue, SharedRealtime, SharedIdemStore) =
        match async_nats::connect(&config.nats_url).await {
            Ok(client) => {
                let queue: SharedQueue = match JetStreamQueue::new(client.clone()).await {
                    Ok(queue) => Arc::new(queue),
                    Err(err) => {
                        warn!(error = %err, "JetStream unavailable; events will process inline");
                        Arc::new(UnavailableQueue)
                    }
                };
                let js = async_nats::jetstream::new(client.clone());
                let idem_store: SharedIdemStore =
                    match NatsKvIdemStore::new(&js, &idem_cfg.namespace).await {
                        Ok(kv) => Arc::new(kv),
                        Err(err) => {
                            warn!(error = %err, "idempotency store unavailable, using in-memory fallback");
                            Arc::new(InMemoryIdemStore::new())
                        }
                    };
                (queue, Arc::new(NatsRealtimePublisher::new(client)), idem_store)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    url = %config.nats_url,
                    "NATS unreachable; running degraded (direct processing, no realtime fan-out)"
                );
                (
                    Arc::new(UnavailableQueue),
                    Arc::new(FailingRealtime),
                    Arc::new(InMemoryIdemStore::new()),
                )
            }
        };

    let adapters = Arc::new(default_registry());
    let generator: SharedGenerator = match &config.generator_url {
        Some(url) => Arc::new(HttpResponseGenerator::new(url.clone())),
        None => Arc::new(UnconfiguredGenerator),
    };
    let credentials = Arc::new(StaticCredentials::new(config.generator_tenants.clone()));

    let responder = ResponseOrchestrator::new(
        store.clone(),
        generator,
        credentials,
        adapters.clone(),
        realtime.clone(),
    )
    .with_timeouts(
        Duration::from_secs(config.generator_timeout_secs),
        Duration::from_secs(config.send_timeout_secs),
    );
    let processor = Arc::new(MessageProcessor::new(store.clone(), realtime, responder));

    let guard = IdempotencyGuard::new(idem_store, idem_cfg.ttl_hours);
    let dispatch = Arc::new(DispatchGateway::new(queue, guard, processor));

    let state = AppState {
        adapters,
        dispatch,
        secrets: Arc::new(config.secrets.clone()),
        allow_unverified: config.allow_unverified,
    };
    if config.allow_unverified {
        warn!("ODM_ALLOW_UNVERIFIED is set; webhook signatures are NOT enforced");
    }

    let app = router(state);
    let listener = TcpListener::bind(config.bind).await?;
    info!("odm-gateway listening on {}", config.bind);

    serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

/// Loads the connection table handed over by the provisioning side.
async fn seed_connections(store: &SharedInboxStore, path: &std::path::Path) -> Result<()> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("read connections file {}", path.display()))?;
    let connections: Vec<Connection> =
        serde_json::from_slice(&raw).context("decode connections file")?;
    let count = connections.len();
    for connection in connections {
        if let Err(err) = store.insert_connection(connection).await {
            warn!(error = %err, "skipping connection from seed file");
        }
    }
    info!(count, path = %path.display(), "seeded connections");
    Ok(())
}
