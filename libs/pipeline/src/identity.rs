//! Maps a normalized event to its connection and conversation, repairing
//! connections whose stored account id has drifted from what the platform
//! now reports.

use odm_core::{Connection, Conversation, InboundEvent};
use odm_store::SharedInboxStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;

pub struct IdentityResolver {
    store: SharedInboxStore,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub connection: Connection,
    pub conversation: Conversation,
    /// True when this event opened the conversation.
    pub created: bool,
}

/// What a consolidation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub merged_conversations: usize,
    pub moved_messages: u64,
}

impl IdentityResolver {
    pub fn new(store: SharedInboxStore) -> Self {
        Self { store }
    }

    /// Resolves `(connection, external user)` to a conversation, creating
    /// one on first contact.
    pub async fn resolve(&self, event: &InboundEvent) -> Result<Resolution, PipelineError> {
        let connection = match self
            .store
            .connection_by_account(event.platform, &event.connection_external_id)
            .await
            .map_err(PipelineError::Persistence)?
        {
            Some(connection) => connection,
            None => self.correct_drifted_connection(event).await?,
        };

        if let Some(conversation) = self
            .store
            .conversation_by_participant(connection.id, &event.sender_external_id)
            .await
            .map_err(PipelineError::Persistence)?
        {
            return Ok(Resolution {
                connection,
                conversation,
                created: false,
            });
        }

        let mut conversation = Conversation::open(&connection, &event.sender_external_id);
        if let Some(profile) = &event.profile {
            conversation.profile.absorb(profile);
        }
        let conversation = self
            .store
            .insert_conversation(conversation)
            .await
            .map_err(PipelineError::Persistence)?;
        info!(
            tenant = %event.tenant,
            platform = %event.platform,
            conversation = %conversation.id,
            "opened conversation for first contact"
        );
        Ok(Resolution {
            connection,
            conversation,
            created: true,
        })
    }

    /// Single-connection drift heuristic: when the platform reports an
    /// account id we do not have, and exactly one active connection exists
    /// for (tenant, platform), assume the stored id drifted and rewrite it
    /// to the observed value. With two or more candidates we refuse to
    /// guess and surface a diagnostic instead.
    ///
    /// Nothing cryptographically ties the webhook to that connection; this
    /// stays a heuristic on purpose, and every correction is logged for
    /// audit.
    async fn correct_drifted_connection(
        &self,
        event: &InboundEvent,
    ) -> Result<Connection, PipelineError> {
        let candidates = self
            .store
            .active_connections(&event.tenant, event.platform)
            .await
            .map_err(PipelineError::Persistence)?;

        let candidate = match candidates.as_slice() {
            [] => {
                return Err(PipelineError::UnknownConnection {
                    platform: event.platform,
                    observed: event.connection_external_id.clone(),
                    tenant: event.tenant.clone(),
                });
            }
            [only] => only.clone(),
            many => {
                error!(
                    tenant = %event.tenant,
                    platform = %event.platform,
                    observed = %event.connection_external_id,
                    candidates = many.len(),
                    "account id drift is ambiguous; operator intervention required"
                );
                return Err(PipelineError::AmbiguousIdentity {
                    platform: event.platform,
                    observed: event.connection_external_id.clone(),
                    candidates: many.len(),
                });
            }
        };

        // Platforms that never report an account id (empty observed value)
        // select the single connection without rewriting anything.
        if event.connection_external_id.is_empty() {
            debug!(
                connection = %candidate.id,
                "payload carries no account id; using the tenant's only connection"
            );
            return Ok(candidate);
        }

        let _guard = self.store.lock_connection(candidate.id).await;

        // Re-check under the lock: a concurrent webhook may have corrected
        // the id already, in which case the plain lookup now succeeds.
        if let Some(connection) = self
            .store
            .connection_by_account(event.platform, &event.connection_external_id)
            .await
            .map_err(PipelineError::Persistence)?
        {
            return Ok(connection);
        }
        let current = self
            .store
            .connection(candidate.id)
            .await
            .map_err(PipelineError::Persistence)?
            .ok_or_else(|| PipelineError::UnknownConnection {
                platform: event.platform,
                observed: event.connection_external_id.clone(),
                tenant: event.tenant.clone(),
            })?;

        let corrected = self
            .store
            .correct_account_id(
                current.id,
                &current.external_account_id,
                &event.connection_external_id,
            )
            .await
            .map_err(PipelineError::Persistence)?;
        if corrected {
            warn!(
                connection = %current.id,
                tenant = %event.tenant,
                platform = %event.platform,
                stored = %current.external_account_id,
                observed = %event.connection_external_id,
                "corrected drifted connection account id"
            );
            odm_telemetry::record_drift_correction(&event.tenant, event.platform.as_str());
        }

        self.store
            .connection(current.id)
            .await
            .map_err(PipelineError::Persistence)?
            .ok_or_else(|| PipelineError::UnknownConnection {
                platform: event.platform,
                observed: event.connection_external_id.clone(),
                tenant: event.tenant.clone(),
            })
    }

    /// Merges duplicate conversations (same external customer, same
    /// connection) into the oldest one. Idempotent and serialized against
    /// ingestion via the connection lock; safe to re-run at any time.
    pub async fn consolidate(
        &self,
        connection_id: Uuid,
    ) -> Result<ConsolidationReport, PipelineError> {
        let _guard = self.store.lock_connection(connection_id).await;

        let conversations = self
            .store
            .conversations_for_connection(connection_id)
            .await
            .map_err(PipelineError::Persistence)?;

        let mut report = ConsolidationReport::default();
        let mut groups: std::collections::BTreeMap<String, Vec<Conversation>> =
            std::collections::BTreeMap::new();
        for conversation in conversations {
            groups
                .entry(conversation.external_user_id.clone())
                .or_default()
                .push(conversation);
        }

        for (user, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            // oldest row survives; ties break on id so concurrent runs agree
            group.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            let mut survivor = group.remove(0);
            for duplicate in group {
                report.moved_messages += self
                    .store
                    .move_messages(duplicate.id, survivor.id)
                    .await
                    .map_err(PipelineError::Persistence)?;
                survivor.unread_count += duplicate.unread_count;
                if duplicate.last_activity_at > survivor.last_activity_at {
                    survivor.last_activity_at = duplicate.last_activity_at;
                }
                self.store
                    .remove_conversation(duplicate.id)
                    .await
                    .map_err(PipelineError::Persistence)?;
                report.merged_conversations += 1;
            }
            self.store
                .update_conversation(survivor.clone())
                .await
                .map_err(PipelineError::Persistence)?;
            info!(
                connection = %connection_id,
                external_user = %user,
                survivor = %survivor.id,
                "consolidated duplicate conversations"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_core::{Connection, EventKind, Platform};
    use odm_store::shared_memory_store;

    fn event(connection_external_id: &str, sender: &str) -> InboundEvent {
        InboundEvent {
            tenant: "acme".into(),
            platform: Platform::Instagram,
            connection_external_id: connection_external_id.into(),
            sender_external_id: sender.into(),
            kind: EventKind::Text,
            text: Some("hi".into()),
            attachment_url: None,
            platform_message_id: Some("mid-1".into()),
            timestamp: "2025-01-01T00:00:00Z".into(),
            profile: None,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn drift_with_one_connection_corrects_and_resolves() {
        let store = shared_memory_store();
        let mut connection = Connection::new("acme", Platform::Instagram, "oauth-9", "Acme IG");
        connection.auto_reply = true;
        store.insert_connection(connection.clone()).await.unwrap();

        let resolver = IdentityResolver::new(store.clone());
        let resolution = resolver.resolve(&event("webhook-9", "ig-user")).await.unwrap();

        assert!(resolution.created);
        assert!(resolution.conversation.auto_reply);
        let reloaded = store.connection(connection.id).await.unwrap().unwrap();
        assert_eq!(reloaded.external_account_id, "webhook-9");

        // the corrected id now resolves without another correction
        let again = resolver.resolve(&event("webhook-9", "ig-user")).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.conversation.id, resolution.conversation.id);
    }

    #[tokio::test]
    async fn ambiguous_drift_aborts_without_mutation() {
        let store = shared_memory_store();
        let first = Connection::new("acme", Platform::Instagram, "oauth-1", "IG One");
        let second = Connection::new("acme", Platform::Instagram, "oauth-2", "IG Two");
        store.insert_connection(first.clone()).await.unwrap();
        store.insert_connection(second.clone()).await.unwrap();

        let resolver = IdentityResolver::new(store.clone());
        let err = resolver
            .resolve(&event("webhook-9", "ig-user"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AmbiguousIdentity { candidates: 2, .. }
        ));
        for connection in [first, second] {
            let reloaded = store.connection(connection.id).await.unwrap().unwrap();
            assert_eq!(reloaded.external_account_id, connection.external_account_id);
        }
        assert!(
            store
                .conversations_for_connection(Uuid::nil())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn empty_observed_id_selects_without_rewrite() {
        let store = shared_memory_store();
        let connection = Connection::new("acme", Platform::Telegram, "bot-42", "Acme Bot");
        store.insert_connection(connection.clone()).await.unwrap();

        let resolver = IdentityResolver::new(store.clone());
        let mut tg_event = event("", "777");
        tg_event.platform = Platform::Telegram;
        let resolution = resolver.resolve(&tg_event).await.unwrap();
        assert_eq!(resolution.connection.id, connection.id);

        let reloaded = store.connection(connection.id).await.unwrap().unwrap();
        assert_eq!(reloaded.external_account_id, "bot-42");
    }

    #[tokio::test]
    async fn unknown_tenant_platform_pair_is_an_error() {
        let store = shared_memory_store();
        let resolver = IdentityResolver::new(store);
        let err = resolver.resolve(&event("wh-1", "user")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownConnection { .. }));
    }
}
