use std::{
    collections::HashMap,
    sync::Arc,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use odm_core::{Connection, Conversation, Message, Platform};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::InboxStore;

/// In-memory reference implementation of [`InboxStore`].
///
/// Conversations carry a secondary index on (connection, external user) so
/// duplicate creation is reconciled inside one write-lock critical section.
#[derive(Default)]
pub struct MemoryInboxStore {
    connections: RwLock<HashMap<Uuid, Connection>>,
    conversations: RwLock<ConversationTable>,
    messages: RwLock<HashMap<Uuid, Vec<Message>>>,
    connection_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

#[derive(Default)]
struct ConversationTable {
    rows: HashMap<Uuid, Conversation>,
    by_participant: HashMap<(Uuid, String), Uuid>,
}

impl MemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for MemoryInboxStore {
    async fn insert_connection(&self, connection: Connection) -> Result<()> {
        let mut guard = self.connections.write().await;
        if guard.values().any(|existing| {
            existing.platform == connection.platform
                && existing.external_account_id == connection.external_account_id
        }) {
            bail!(
                "connection for {}/{} already exists",
                connection.platform,
                connection.external_account_id
            );
        }
        guard.insert(connection.id, connection);
        Ok(())
    }

    async fn connection(&self, id: Uuid) -> Result<Option<Connection>> {
        Ok(self.connections.read().await.get(&id).cloned())
    }

    async fn connection_by_account(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<Connection>> {
        if external_account_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .connections
            .read()
            .await
            .values()
            .find(|c| c.platform == platform && c.external_account_id == external_account_id)
            .cloned())
    }

    async fn active_connections(
        &self,
        tenant: &str,
        platform: Platform,
    ) -> Result<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.tenant == tenant && c.platform == platform && c.subscribed)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn correct_account_id(&self, id: Uuid, expected: &str, observed: &str) -> Result<bool> {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&id) {
            Some(connection) if connection.external_account_id == expected => {
                connection.external_account_id = observed.to_string();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("connection {id} not found"),
        }
    }

    async fn remove_connection(&self, id: Uuid) -> Result<()> {
        self.connections.write().await.remove(&id);
        let doomed: Vec<Uuid> = {
            let mut convos = self.conversations.write().await;
            let ids: Vec<Uuid> = convos
                .rows
                .values()
                .filter(|c| c.connection_id == id)
                .map(|c| c.id)
                .collect();
            for convo_id in &ids {
                if let Some(convo) = convos.rows.remove(convo_id) {
                    convos
                        .by_participant
                        .remove(&(convo.connection_id, convo.external_user_id));
                }
            }
            ids
        };
        let mut messages = self.messages.write().await;
        for convo_id in doomed {
            messages.remove(&convo_id);
        }
        Ok(())
    }

    async fn conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.rows.get(&id).cloned())
    }

    async fn conversation_by_participant(
        &self,
        connection_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<Conversation>> {
        let table = self.conversations.read().await;
        Ok(table
            .by_participant
            .get(&(connection_id, external_user_id.to_string()))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn conversations_for_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<Vec<Conversation>> {
        let mut found: Vec<Conversation> = self
            .conversations
            .read()
            .await
            .rows
            .values()
            .filter(|c| c.connection_id == connection_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.created_at, c.id));
        Ok(found)
    }

    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let mut table = self.conversations.write().await;
        let key = (
            conversation.connection_id,
            conversation.external_user_id.clone(),
        );
        if let Some(existing) = table.by_participant.get(&key).copied() {
            // lost the creation race; hand back the surviving row
            return Ok(table.rows[&existing].clone());
        }
        table.by_participant.insert(key, conversation.id);
        table.rows.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn update_conversation(&self, conversation: Conversation) -> Result<()> {
        let mut table = self.conversations.write().await;
        let Some(previous) = table.rows.get(&conversation.id).cloned() else {
            bail!("conversation {} not found", conversation.id);
        };
        // keep the participant index in step when a maintenance flow moves
        // the row under another connection
        let old_key = (previous.connection_id, previous.external_user_id);
        if table.by_participant.get(&old_key) == Some(&conversation.id) {
            table.by_participant.remove(&old_key);
        }
        table
            .by_participant
            .entry((
                conversation.connection_id,
                conversation.external_user_id.clone(),
            ))
            .or_insert(conversation.id);
        table.rows.insert(conversation.id, conversation);
        Ok(())
    }

    async fn remove_conversation(&self, id: Uuid) -> Result<()> {
        let mut table = self.conversations.write().await;
        if let Some(convo) = table.rows.remove(&id) {
            let key = (convo.connection_id, convo.external_user_id);
            // duplicates share a key; only drop the index entry we own
            if table.by_participant.get(&key) == Some(&id) {
                table.by_participant.remove(&key);
            }
        }
        self.messages.write().await.remove(&id);
        Ok(())
    }

    async fn insert_message(&self, message: Message) -> Result<()> {
        self.messages
            .write()
            .await
            .entry(message.conversation_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn update_message(&self, message: Message) -> Result<()> {
        let mut table = self.messages.write().await;
        let rows = table
            .get_mut(&message.conversation_id)
            .ok_or_else(|| anyhow::anyhow!("conversation {} has no messages", message.conversation_id))?;
        match rows.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                Ok(())
            }
            None => bail!("message {} not found", message.id),
        }
    }

    async fn message_by_platform_id(
        &self,
        conversation_id: Uuid,
        platform_message_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .get(&conversation_id)
            .and_then(|rows| {
                rows.iter()
                    .find(|m| m.platform_message_id.as_deref() == Some(platform_message_id))
            })
            .cloned())
    }

    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn move_messages(&self, from: Uuid, to: Uuid) -> Result<u64> {
        if from == to {
            return Ok(0);
        }
        let mut table = self.messages.write().await;
        let mut moved = table.remove(&from).unwrap_or_default();
        let count = moved.len() as u64;
        if count > 0 {
            for message in &mut moved {
                message.conversation_id = to;
            }
            table.entry(to).or_default().append(&mut moved);
        }
        Ok(count)
    }

    async fn lock_connection(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .connection_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_core::Platform;

    fn connection(tenant: &str, account: &str) -> Connection {
        Connection::new(tenant, Platform::Messenger, account, "Test Page")
    }

    #[tokio::test]
    async fn duplicate_conversation_creation_is_reconciled() {
        let store = MemoryInboxStore::new();
        let conn = connection("acme", "page-1");
        store.insert_connection(conn.clone()).await.unwrap();

        let first = store
            .insert_conversation(Conversation::open(&conn, "psid-1"))
            .await
            .unwrap();
        let second = store
            .insert_conversation(Conversation::open(&conn, "psid-1"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn correct_account_id_is_compare_and_set() {
        let store = MemoryInboxStore::new();
        let conn = connection("acme", "oauth-id");
        store.insert_connection(conn.clone()).await.unwrap();

        assert!(
            store
                .correct_account_id(conn.id, "oauth-id", "webhook-id")
                .await
                .unwrap()
        );
        // stale expectation loses
        assert!(
            !store
                .correct_account_id(conn.id, "oauth-id", "other")
                .await
                .unwrap()
        );
        let reloaded = store.connection(conn.id).await.unwrap().unwrap();
        assert_eq!(reloaded.external_account_id, "webhook-id");
    }

    #[tokio::test]
    async fn move_messages_preserves_order_and_is_idempotent() {
        let store = MemoryInboxStore::new();
        let conn = connection("acme", "page-1");
        store.insert_connection(conn.clone()).await.unwrap();
        let a = store
            .insert_conversation(Conversation::open(&conn, "psid-a"))
            .await
            .unwrap();
        let b = store
            .insert_conversation(Conversation::open(&conn, "psid-b"))
            .await
            .unwrap();

        for text in ["one", "two"] {
            let mut msg = Message::customer(b.id);
            msg.text = Some(text.into());
            store.insert_message(msg).await.unwrap();
        }

        assert_eq!(store.move_messages(b.id, a.id).await.unwrap(), 2);
        assert_eq!(store.move_messages(b.id, a.id).await.unwrap(), 0);

        let rows = store.messages(a.id).await.unwrap();
        let texts: Vec<_> = rows.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(rows.iter().all(|m| m.conversation_id == a.id));
    }

    #[tokio::test]
    async fn remove_connection_cascades() {
        let store = MemoryInboxStore::new();
        let conn = connection("acme", "page-1");
        store.insert_connection(conn.clone()).await.unwrap();
        let convo = store
            .insert_conversation(Conversation::open(&conn, "psid-1"))
            .await
            .unwrap();
        store
            .insert_message(Message::customer(convo.id))
            .await
            .unwrap();

        store.remove_connection(conn.id).await.unwrap();
        assert!(store.conversation(convo.id).await.unwrap().is_none());
        assert!(store.messages(convo.id).await.unwrap().is_empty());
        assert!(
            store
                .connection_by_account(Platform::Messenger, "page-1")
                .await
                .unwrap()
                .is_none()
        );
    }
}
