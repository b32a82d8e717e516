//! Durable queue decoupling webhook receipt from message processing.
//!
//! The gateway enqueues normalized events; workers consume them through a
//! JetStream work-queue stream. Queue unavailability is a first-class
//! condition: callers fall back to direct processing, so `enqueue` must
//! fail fast and loudly rather than hang.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::{
    Client,
    jetstream::{
        self,
        consumer::{
            AckPolicy,
            push::{Config as PushConfig, Messages},
        },
        stream::{Config as StreamConfig, RetentionPolicy},
    },
};
use async_trait::async_trait;
use odm_core::{InboundEvent, queue_subject};
use tokio::sync::{Mutex, mpsc};

pub const STREAM_NAME: &str = "ODM-MSG-IN";
pub const SUBJECT_FILTER: &str = "odm.msg.in.>";
const WORKER_GROUP: &str = "odm-workers";

pub type SharedQueue = Arc<dyn DurableQueue>;

#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Hands one event to the queue. An `Err` means the event was NOT
    /// accepted and the caller owns delivery (direct-mode fallback).
    async fn enqueue(&self, event: &InboundEvent) -> Result<()>;
}

/// JetStream-backed work queue.
pub struct JetStreamQueue {
    js: jetstream::Context,
}

impl JetStreamQueue {
    /// Ensures the stream exists and returns a publisher handle.
    pub async fn new(client: Client) -> Result<Self> {
        let js = jetstream::new(client);
        ensure_stream(&js).await?;
        Ok(Self { js })
    }
}

#[async_trait]
impl DurableQueue for JetStreamQueue {
    async fn enqueue(&self, event: &InboundEvent) -> Result<()> {
        let subject = queue_subject(&event.tenant, event.platform, &event.sender_external_id);
        let payload = serde_json::to_vec(event)?;
        // double await: the second resolves the broker's publish ack, so an
        // Ok here means the event is on disk server-side
        self.js
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("publish to {subject}"))?
            .await
            .with_context(|| format!("await publish ack on {subject}"))?;
        Ok(())
    }
}

async fn ensure_stream(js: &jetstream::Context) -> Result<()> {
    let mut cfg = StreamConfig::default();
    cfg.name = STREAM_NAME.to_string();
    cfg.subjects = vec![SUBJECT_FILTER.to_string()];
    cfg.retention = RetentionPolicy::WorkQueue;
    cfg.max_messages = -1;
    cfg.max_bytes = -1;
    js.get_or_create_stream(cfg)
        .await
        .with_context(|| format!("ensure stream {STREAM_NAME}"))?;
    Ok(())
}

/// Binds the durable queue-group consumer a worker pulls from.
pub async fn bind_worker(client: &Client, worker_id: &str) -> Result<Messages> {
    let js = jetstream::new(client.clone());
    ensure_stream(&js).await?;
    let stream = js
        .get_stream(STREAM_NAME)
        .await
        .with_context(|| format!("get stream {STREAM_NAME}"))?;

    let consumer_name = format!("{WORKER_GROUP}-consumer");
    let consumer = stream
        .get_or_create_consumer(
            &consumer_name,
            PushConfig {
                durable_name: Some(consumer_name.clone()),
                deliver_subject: format!("deliver.{WORKER_GROUP}.{worker_id}"),
                deliver_group: Some(WORKER_GROUP.to_string()),
                filter_subject: SUBJECT_FILTER.to_string(),
                ack_policy: AckPolicy::Explicit,
                max_ack_pending: 256,
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("ensure consumer {consumer_name}"))?;

    consumer
        .messages()
        .await
        .with_context(|| format!("attach consumer stream {consumer_name}"))
}

/// Unbounded in-process queue; tests drain it to play the worker role.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<InboundEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Removes and returns everything enqueued so far.
    pub async fn drain(&self) -> Vec<InboundEvent> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn enqueue(&self, event: &InboundEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("memory queue receiver dropped"))
    }
}

/// Queue that refuses every enqueue; exercises direct-mode fallback.
pub struct UnavailableQueue;

#[async_trait]
impl DurableQueue for UnavailableQueue {
    async fn enqueue(&self, _event: &InboundEvent) -> Result<()> {
        anyhow::bail!("durable queue unreachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_core::{EventKind, Platform};

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            tenant: "acme".into(),
            platform: Platform::Messenger,
            connection_external_id: "page-1".into(),
            sender_external_id: "psid-1".into(),
            kind: EventKind::Text,
            text: Some(text.into()),
            attachment_url: None,
            platform_message_id: Some(format!("mid-{text}")),
            timestamp: "2025-01-01T00:00:00Z".into(),
            profile: None,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn memory_queue_round_trips_in_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(&event("a")).await.unwrap();
        queue.enqueue(&event("b")).await.unwrap();
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text.as_deref(), Some("a"));
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_queue_always_fails() {
        assert!(UnavailableQueue.enqueue(&event("x")).await.is_err());
    }
}
