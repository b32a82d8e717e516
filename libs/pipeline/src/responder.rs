//! Decides whether an automated reply is owed, produces it through the
//! external generator, and dispatches it back through the right adapter.

use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use odm_adapters::AdapterRegistry;
use odm_core::{Conversation, Message, OutboundMessage};
use odm_realtime::{CONVERSATION_UPDATED, MESSAGE_CREATED, RealtimeEvent, Scope, SharedRealtime};
use odm_store::SharedInboxStore;
use serde_json::json;
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::generator::{SharedCredentials, SharedGenerator};

pub struct ResponseOrchestrator {
    store: SharedInboxStore,
    generator: SharedGenerator,
    credentials: SharedCredentials,
    adapters: Arc<AdapterRegistry>,
    realtime: SharedRealtime,
    generator_timeout: Duration,
    send_timeout: Duration,
}

impl ResponseOrchestrator {
    pub fn new(
        store: SharedInboxStore,
        generator: SharedGenerator,
        credentials: SharedCredentials,
        adapters: Arc<AdapterRegistry>,
        realtime: SharedRealtime,
    ) -> Self {
        Self {
            store,
            generator,
            credentials,
            adapters,
            realtime,
            generator_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, generator: Duration, send: Duration) -> Self {
        self.generator_timeout = generator;
        self.send_timeout = send;
        self
    }

    /// Produces and dispatches an automated reply when one is owed.
    ///
    /// Both gates failing quietly is deliberate: a disabled flag or a
    /// missing credential is configuration, not an error. Generator
    /// failures leave the customer message for manual handling; send
    /// failures leave the reply persisted and visible to agents.
    pub async fn maybe_respond(
        &self,
        conversation: &Conversation,
        inbound: &Message,
    ) -> Result<Option<Message>, PipelineError> {
        if !conversation.auto_reply {
            return Ok(None);
        }
        if !self
            .credentials
            .has_generator_credential(&conversation.tenant)
            .await
        {
            debug!(tenant = %conversation.tenant, "no generator credential; skipping auto-reply");
            return Ok(None);
        }
        let Some(text) = inbound.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            debug!("inbound message has no text to respond to");
            return Ok(None);
        };

        let generated = match timeout(
            self.generator_timeout,
            self.generator
                .generate(text, &conversation.tenant, conversation.id),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!(error = %err, conversation = %conversation.id, "response generation failed");
                return Ok(None);
            }
            Err(_) => {
                warn!(conversation = %conversation.id, "response generation timed out");
                return Ok(None);
            }
        };

        let correlation_id = nanoid!(10);
        let mut reply = Message::bot(conversation.id);
        reply.text = Some(generated.text.clone());
        reply.metadata.insert("usage".into(), generated.usage);
        reply
            .metadata
            .insert("correlation_id".into(), json!(correlation_id));

        self.store
            .insert_message(reply.clone())
            .await
            .map_err(PipelineError::Persistence)?;
        odm_telemetry::record_reply(&conversation.tenant);

        let mut updated = conversation.clone();
        updated.last_activity_at = OffsetDateTime::now_utc();
        if let Err(err) = self.store.update_conversation(updated.clone()).await {
            warn!(error = %err, "failed to bump conversation activity after reply");
        }

        self.deliver(&updated, &mut reply, correlation_id).await;

        // second notification pair, after the reply row is final
        self.publish_swallowing(
            &Scope::Conversation(updated.id),
            RealtimeEvent::new(
                MESSAGE_CREATED,
                serde_json::to_value(&reply).unwrap_or_default(),
            ),
        )
        .await;
        self.publish_swallowing(
            &Scope::Tenant(updated.tenant.clone()),
            RealtimeEvent::new(
                CONVERSATION_UPDATED,
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await;

        Ok(Some(reply))
    }

    /// Sends the persisted reply out through the platform. Failure marks
    /// the row undelivered instead of rolling anything back; agents see
    /// the reply either way.
    async fn deliver(&self, conversation: &Conversation, reply: &mut Message, correlation_id: String) {
        let Some(adapter) = self.adapters.get(conversation.platform) else {
            warn!(platform = %conversation.platform, "no adapter registered; reply not delivered");
            self.mark_undelivered(reply, "no_adapter").await;
            return;
        };
        let connection = match self.store.connection(conversation.connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                warn!(connection = %conversation.connection_id, "connection vanished; reply not delivered");
                self.mark_undelivered(reply, "missing_connection").await;
                return;
            }
            Err(err) => {
                warn!(error = %err, "connection lookup failed; reply not delivered");
                self.mark_undelivered(reply, "connection_lookup").await;
                return;
            }
        };

        let outbound = OutboundMessage {
            conversation_id: conversation.id,
            recipient_external_id: conversation.external_user_id.clone(),
            text: reply.text.clone(),
            attachment_url: None,
            correlation_id,
        };

        match timeout(self.send_timeout, adapter.send(&connection, &outbound)).await {
            Ok(Ok(receipt)) => {
                reply.platform_message_id = Some(receipt.platform_message_id);
                if let Err(err) = self.store.update_message(reply.clone()).await {
                    warn!(error = %err, "failed to record send receipt");
                }
            }
            Ok(Err(err)) => {
                warn!(
                    error = %err,
                    retryable = err.is_retryable(),
                    conversation = %conversation.id,
                    "reply delivery failed; reply remains persisted"
                );
                self.mark_undelivered(reply, err.code()).await;
            }
            Err(_) => {
                warn!(conversation = %conversation.id, "reply delivery timed out");
                self.mark_undelivered(reply, "send_timeout").await;
            }
        }
    }

    async fn mark_undelivered(&self, reply: &mut Message, code: &str) {
        reply
            .metadata
            .insert("delivery_failed".into(), json!(code));
        if let Err(err) = self.store.update_message(reply.clone()).await {
            warn!(error = %err, "failed to mark reply undelivered");
        }
    }

    async fn publish_swallowing(&self, scope: &Scope, event: RealtimeEvent) {
        if let Err(err) = self.realtime.publish(scope, event).await {
            warn!(error = %err, scope = scope.kind(), "realtime publish failed; continuing");
            odm_telemetry::record_publish_failure(scope.kind());
        }
    }
}
