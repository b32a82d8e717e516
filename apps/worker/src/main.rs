//! Queue worker: pulls normalized events off the durable queue and runs
//! the same processor the gateway's direct-mode fallback runs, so queued
//! and inline handling cannot diverge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream::AckKind;
use futures::StreamExt;
use nanoid::nanoid;
use odm_adapters::default_registry;
use odm_core::InboundEvent;
use odm_pipeline::{
    HttpResponseGenerator, MessageProcessor, ResponseOrchestrator, SharedGenerator,
    StaticCredentials, UnconfiguredGenerator,
};
use odm_realtime::NatsRealtimePublisher;
use odm_store::shared_memory_store;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    odm_telemetry::install("odm-worker")?;

    let nats_url =
        std::env::var("ODM_NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".into());
    let worker_id = std::env::var("ODM_WORKER_ID").unwrap_or_else(|_| nanoid!(8));
    let generator_url = std::env::var("ODM_GENERATOR_URL").ok().filter(|u| !u.is_empty());
    let generator_tenants: Vec<String> = std::env::var("ODM_GENERATOR_TENANTS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // workers cannot degrade to direct mode; without the queue there is
    // nothing to do
    let client = async_nats::connect(&nats_url).await?;
    let mut messages = odm_queue::bind_worker(&client, &worker_id).await?;

    let store = shared_memory_store();
    let realtime = Arc::new(NatsRealtimePublisher::new(client));
    let adapters = Arc::new(default_registry());
    let generator: SharedGenerator = match generator_url {
        Some(url) => Arc::new(HttpResponseGenerator::new(url)),
        None => Arc::new(UnconfiguredGenerator),
    };
    let responder = ResponseOrchestrator::new(
        store.clone(),
        generator,
        Arc::new(StaticCredentials::new(generator_tenants)),
        adapters,
        realtime.clone(),
    )
    .with_timeouts(Duration::from_secs(30), Duration::from_secs(10));
    let processor = MessageProcessor::new(store, realtime, responder);

    info!(%worker_id, "odm-worker consuming from {}", odm_queue::STREAM_NAME);

    while let Some(delivery) = messages.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(error = %err, "consumer stream error");
                continue;
            }
        };

        let event: InboundEvent = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "undecodable queue payload; dropping");
                ack(&delivery, AckKind::Term).await;
                continue;
            }
        };

        match processor.process(&event).await {
            Ok(_) => ack(&delivery, AckKind::Ack).await,
            Err(err) if err.is_retryable() => {
                warn!(error = %err, tenant = %event.tenant, "processing failed; redelivering");
                ack(&delivery, AckKind::Nak(None)).await;
            }
            Err(err) => {
                error!(error = %err, tenant = %event.tenant, "processing failed permanently");
                ack(&delivery, AckKind::Ack).await;
            }
        }
    }

    Ok(())
}

async fn ack(delivery: &async_nats::jetstream::Message, kind: AckKind) {
    if let Err(err) = delivery.ack_with(kind).await {
        warn!(error = %err, "failed to ack queue delivery");
    }
}
