//! Persistence interface for the conversation model.
//!
//! The pipeline talks to storage through [`InboxStore`]; deployments bind a
//! database-backed implementation, tests and single-node setups use
//! [`MemoryInboxStore`]. The trait surfaces the two serialization points the
//! pipeline needs: a compare-and-set on a connection's external account id
//! (drift correction) and a per-connection lock (consolidation).

mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use odm_core::{Connection, Conversation, Message, Platform};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub use memory::MemoryInboxStore;

/// Shared store handle used across services.
pub type SharedInboxStore = Arc<dyn InboxStore>;

#[async_trait]
pub trait InboxStore: Send + Sync {
    // Connections
    async fn insert_connection(&self, connection: Connection) -> Result<()>;
    async fn connection(&self, id: Uuid) -> Result<Option<Connection>>;
    async fn connection_by_account(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<Connection>>;
    /// Active (subscribed) connections for one tenant on one platform.
    async fn active_connections(
        &self,
        tenant: &str,
        platform: Platform,
    ) -> Result<Vec<Connection>>;
    /// Compare-and-set rewrite of the stored external account id. Returns
    /// false when the stored id no longer matches `expected` (a concurrent
    /// correction won).
    async fn correct_account_id(&self, id: Uuid, expected: &str, observed: &str) -> Result<bool>;
    /// Removes the connection and cascades to its conversations and their
    /// messages.
    async fn remove_connection(&self, id: Uuid) -> Result<()>;

    // Conversations
    async fn conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn conversation_by_participant(
        &self,
        connection_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<Conversation>>;
    async fn conversations_for_connection(&self, connection_id: Uuid)
    -> Result<Vec<Conversation>>;
    /// Inserts unless a conversation for the same (connection, user) pair
    /// already exists; returns the surviving row either way.
    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation>;
    async fn update_conversation(&self, conversation: Conversation) -> Result<()>;
    async fn remove_conversation(&self, id: Uuid) -> Result<()>;

    // Messages
    async fn insert_message(&self, message: Message) -> Result<()>;
    async fn update_message(&self, message: Message) -> Result<()>;
    async fn message_by_platform_id(
        &self,
        conversation_id: Uuid,
        platform_message_id: &str,
    ) -> Result<Option<Message>>;
    /// Messages of one conversation in insertion order.
    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;
    /// Moves every message of `from` to the end of `to`, preserving order.
    /// Returns how many rows moved; zero when `from` holds none.
    async fn move_messages(&self, from: Uuid, to: Uuid) -> Result<u64>;

    /// Serializes drift correction and consolidation for one connection.
    /// Holders must keep the guard across the whole read-modify-write.
    async fn lock_connection(&self, id: Uuid) -> OwnedMutexGuard<()>;
}

/// Returns an in-memory store wrapped in an [`Arc`].
pub fn shared_memory_store() -> SharedInboxStore {
    Arc::new(MemoryInboxStore::new())
}
