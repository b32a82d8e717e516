//! The unit of work both dispatch routes converge on: persist the inbound
//! message, update conversation state, notify viewers, and hand off to the
//! response orchestrator.

use odm_core::{Conversation, ConversationStatus, EventKind, InboundEvent, Message};
use odm_realtime::{CONVERSATION_UPDATED, MESSAGE_CREATED, RealtimeEvent, Scope, SharedRealtime};
use odm_store::SharedInboxStore;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::identity::IdentityResolver;
use crate::responder::ResponseOrchestrator;

pub struct MessageProcessor {
    store: SharedInboxStore,
    resolver: IdentityResolver,
    realtime: SharedRealtime,
    responder: ResponseOrchestrator,
}

/// What one processed event produced. Skipped events (echoes, unmatched
/// callbacks) leave every field empty.
#[derive(Debug, Clone, Default)]
pub struct ProcessingOutcome {
    pub conversation: Option<Conversation>,
    pub message: Option<Message>,
    pub reply: Option<Message>,
}

impl ProcessingOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

impl MessageProcessor {
    pub fn new(
        store: SharedInboxStore,
        realtime: SharedRealtime,
        responder: ResponseOrchestrator,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone()),
            store,
            realtime,
            responder,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub async fn process(&self, event: &InboundEvent) -> Result<ProcessingOutcome, PipelineError> {
        // adapters drop echoes at parse time; anything that slips through a
        // replayed queue payload is ignored here as well
        if event.kind == EventKind::Echo {
            debug!(platform = %event.platform, "ignoring echo event");
            return Ok(ProcessingOutcome::skipped());
        }

        let resolution = self.resolver.resolve(event).await?;
        let mut conversation = resolution.conversation;

        if !event.creates_message() {
            return self.apply_callback(event, conversation).await;
        }

        // store-level idempotency: a re-delivered platform message id maps
        // onto the row it already created
        if let Some(mid) = event.platform_message_id.as_deref()
            && let Some(existing) = self
                .store
                .message_by_platform_id(conversation.id, mid)
                .await
                .map_err(PipelineError::Persistence)?
        {
            debug!(%mid, "event already persisted; skipping duplicate");
            return Ok(ProcessingOutcome {
                conversation: Some(conversation),
                message: Some(existing),
                reply: None,
            });
        }

        let mut message = Message::customer(conversation.id);
        message.text = event.text.clone();
        message.attachment_url = event.attachment_url.clone();
        message.platform_message_id = event.platform_message_id.clone();
        message
            .metadata
            .insert("platform_timestamp".into(), json!(event.timestamp));
        if event.kind == EventKind::Postback {
            message
                .metadata
                .insert("postback".into(), event.payload.clone());
        }

        self.store
            .insert_message(message.clone())
            .await
            .map_err(PipelineError::Persistence)?;

        conversation.last_activity_at = OffsetDateTime::now_utc();
        conversation.unread_count += 1;
        if conversation.status == ConversationStatus::Closed {
            conversation.status = ConversationStatus::Open;
        }
        if let Some(profile) = &event.profile {
            conversation.profile.absorb(profile);
        }
        self.store
            .update_conversation(conversation.clone())
            .await
            .map_err(PipelineError::Persistence)?;

        odm_telemetry::record_ingress(&event.tenant, event.platform.as_str());
        self.notify(&conversation, &message).await;

        let reply = self.responder.maybe_respond(&conversation, &message).await?;

        Ok(ProcessingOutcome {
            conversation: Some(conversation),
            message: Some(message),
            reply,
        })
    }

    /// Delivery/read/reaction/edit callbacks mutate existing rows through
    /// the platform message id; they never create messages and never
    /// trigger auto-reply.
    async fn apply_callback(
        &self,
        event: &InboundEvent,
        conversation: Conversation,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let mut touched = false;
        match event.kind {
            EventKind::Delivery => {
                let mids = event
                    .payload
                    .get("delivery")
                    .and_then(|d| d.get("mids"))
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                for mid in mids.iter().filter_map(|v| v.as_str()) {
                    touched |= self
                        .stamp_message(conversation.id, mid, "delivered", json!(true))
                        .await?;
                }
            }
            EventKind::Read => {
                // the platform reports a watermark; everything we sent in
                // this thread is now seen
                let rows = self
                    .store
                    .messages(conversation.id)
                    .await
                    .map_err(PipelineError::Persistence)?;
                for mut row in rows {
                    if row.role != odm_core::MessageRole::Customer
                        && !row.metadata.contains_key("read")
                    {
                        row.metadata.insert("read".into(), json!(true));
                        self.store
                            .update_message(row)
                            .await
                            .map_err(PipelineError::Persistence)?;
                        touched = true;
                    }
                }
            }
            EventKind::Reaction => {
                if let Some(mid) = event.platform_message_id.as_deref() {
                    let emoji = event
                        .payload
                        .get("reaction")
                        .and_then(|r| r.get("emoji"))
                        .cloned()
                        .unwrap_or(json!(null));
                    touched = self
                        .stamp_message(conversation.id, mid, "reaction", emoji)
                        .await?;
                }
            }
            EventKind::Edit => {
                if let Some(mid) = event.platform_message_id.as_deref()
                    && let Some(mut row) = self
                        .store
                        .message_by_platform_id(conversation.id, mid)
                        .await
                        .map_err(PipelineError::Persistence)?
                {
                    row.text = event.text.clone();
                    row.metadata
                        .insert("edited_at".into(), json!(event.timestamp));
                    self.store
                        .update_message(row)
                        .await
                        .map_err(PipelineError::Persistence)?;
                    touched = true;
                }
            }
            _ => {
                debug!(kind = ?event.kind, "no callback handling for event kind");
            }
        }

        if touched {
            self.publish_swallowing(
                &Scope::Tenant(conversation.tenant.clone()),
                RealtimeEvent::new(
                    CONVERSATION_UPDATED,
                    json!({"conversation_id": conversation.id, "kind": format!("{:?}", event.kind)}),
                ),
            )
            .await;
        }

        Ok(ProcessingOutcome {
            conversation: Some(conversation),
            message: None,
            reply: None,
        })
    }

    async fn stamp_message(
        &self,
        conversation_id: uuid::Uuid,
        platform_message_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, PipelineError> {
        let Some(mut row) = self
            .store
            .message_by_platform_id(conversation_id, platform_message_id)
            .await
            .map_err(PipelineError::Persistence)?
        else {
            debug!(%platform_message_id, "callback for unknown message; dropping");
            return Ok(false);
        };
        row.metadata.insert(key.to_string(), value);
        self.store
            .update_message(row)
            .await
            .map_err(PipelineError::Persistence)?;
        Ok(true)
    }

    /// Notifies viewers about a freshly persisted message. Ordering matters
    /// (message-created before conversation-updated) so the publishes are
    /// awaited in sequence; failures are logged and swallowed because
    /// realtime delivery must never fail a persisted message.
    async fn notify(&self, conversation: &Conversation, message: &Message) {
        self.publish_swallowing(
            &Scope::Conversation(conversation.id),
            RealtimeEvent::new(
                MESSAGE_CREATED,
                serde_json::to_value(message).unwrap_or_default(),
            ),
        )
        .await;
        self.publish_swallowing(
            &Scope::Tenant(conversation.tenant.clone()),
            RealtimeEvent::new(
                CONVERSATION_UPDATED,
                serde_json::to_value(conversation).unwrap_or_default(),
            ),
        )
        .await;
    }

    async fn publish_swallowing(&self, scope: &Scope, event: RealtimeEvent) {
        if let Err(err) = self.realtime.publish(scope, event).await {
            warn!(error = %err, scope = scope.kind(), "realtime publish failed; continuing");
            odm_telemetry::record_publish_failure(scope.kind());
        }
    }
}
