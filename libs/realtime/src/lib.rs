//! Realtime fan-out to staff viewing the inbox.
//!
//! Publishes `message.created` / `conversation.updated` envelopes to a
//! tenant-wide scope and a per-conversation scope. Delivery is
//! at-least-once and best-effort: nothing is persisted or replayed, and a
//! reconnecting viewer re-fetches state through a normal query.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use odm_core::{realtime_conversation_subject, realtime_tenant_subject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const MESSAGE_CREATED: &str = "message.created";
pub const CONVERSATION_UPDATED: &str = "conversation.updated";

/// Who should see a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every viewer of the tenant's inbox.
    Tenant(String),
    /// Viewers of one conversation thread.
    Conversation(Uuid),
}

impl Scope {
    pub fn subject(&self) -> String {
        match self {
            Scope::Tenant(tenant) => realtime_tenant_subject(tenant),
            Scope::Conversation(id) => realtime_conversation_subject(*id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Tenant(_) => "tenant",
            Scope::Conversation(_) => "conversation",
        }
    }
}

/// One notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

pub type SharedRealtime = Arc<dyn RealtimePublisher>;

#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(&self, scope: &Scope, event: RealtimeEvent) -> Result<()>;
}

/// NATS core pub/sub publisher; the websocket edge subscribes per scope and
/// relays to connected viewers.
pub struct NatsRealtimePublisher {
    client: async_nats::Client,
}

impl NatsRealtimePublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RealtimePublisher for NatsRealtimePublisher {
    async fn publish(&self, scope: &Scope, event: RealtimeEvent) -> Result<()> {
        let payload = serde_json::to_vec(&event)?;
        self.client.publish(scope.subject(), payload.into()).await?;
        Ok(())
    }
}

/// In-memory hub recording every publish in order; test collaborator.
#[derive(Default)]
pub struct MemoryRealtimeHub {
    published: Mutex<Vec<(Scope, RealtimeEvent)>>,
}

impl MemoryRealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(Scope, RealtimeEvent)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl RealtimePublisher for MemoryRealtimeHub {
    async fn publish(&self, scope: &Scope, event: RealtimeEvent) -> Result<()> {
        self.published.lock().await.push((scope.clone(), event));
        Ok(())
    }
}

/// Publisher that always fails; exercises the swallow-and-continue policy.
pub struct FailingRealtime;

#[async_trait]
impl RealtimePublisher for FailingRealtime {
    async fn publish(&self, _scope: &Scope, _event: RealtimeEvent) -> Result<()> {
        anyhow::bail!("realtime sink unavailable")
    }
}
