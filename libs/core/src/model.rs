use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::Platform;

/// A tenant's authorized link to one external platform account.
///
/// `external_account_id` is unique per platform at any instant but may be
/// rewritten after the fact by drift correction, so readers must tolerate a
/// connection whose stored id temporarily disagrees with incoming traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub id: Uuid,
    pub tenant: String,
    pub platform: Platform,
    pub external_account_id: String,
    pub display_name: String,
    pub auto_reply: bool,
    /// Decrypted outbound credential, supplied by the credential store
    /// collaborator. Absent when the connection cannot send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Health flag: false once the platform-side subscription is broken.
    pub subscribed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Connection {
    pub fn new(
        tenant: impl Into<String>,
        platform: Platform,
        external_account_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            platform,
            external_account_id: external_account_id.into(),
            display_name: display_name.into(),
            auto_reply: false,
            credential: None,
            subscribed: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
}

/// Denormalized customer profile blob kept on the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomerProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CustomerProfile {
    /// Fills in fields the incoming payload knows and we do not.
    /// Returns true when anything changed.
    pub fn absorb(&mut self, fresher: &CustomerProfile) -> bool {
        let mut changed = false;
        for (slot, incoming) in [
            (&mut self.display_name, &fresher.display_name),
            (&mut self.avatar_url, &fresher.avatar_url),
            (&mut self.email, &fresher.email),
            (&mut self.phone, &fresher.phone),
        ] {
            if incoming.is_some() && incoming != slot {
                *slot = incoming.clone();
                changed = true;
            }
        }
        changed
    }
}

/// A thread with one external customer under one connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub tenant: String,
    pub platform: Platform,
    /// Platform-scoped sender id ("psid").
    pub external_user_id: String,
    pub status: ConversationStatus,
    /// Inherited from the connection at creation, independently toggleable.
    pub auto_reply: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    pub unread_count: u32,
    #[serde(default)]
    pub profile: CustomerProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Conversation {
    /// Opens a new conversation for a first-contact sender.
    pub fn open(connection: &Connection, external_user_id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            connection_id: connection.id,
            tenant: connection.tenant.clone(),
            platform: connection.platform,
            external_user_id: external_user_id.into(),
            status: ConversationStatus::Open,
            auto_reply: connection.auto_reply,
            last_activity_at: now,
            unread_count: 0,
            profile: CustomerProfile::default(),
            assignee: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Customer,
    Agent,
    Bot,
}

/// One persisted message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    /// Platform-native id, used to deduplicate and to correlate
    /// delivery/read/edit/reaction callbacks against this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn customer(conversation_id: Uuid) -> Self {
        Self::with_role(conversation_id, MessageRole::Customer)
    }

    pub fn bot(conversation_id: Uuid) -> Self {
        Self::with_role(conversation_id, MessageRole::Bot)
    }

    fn with_role(conversation_id: Uuid, role: MessageRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            text: None,
            attachment_url: None,
            platform_message_id: None,
            metadata: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_inherits_auto_reply() {
        let mut connection = Connection::new("acme", Platform::Messenger, "page-1", "Acme Page");
        connection.auto_reply = true;
        let convo = Conversation::open(&connection, "psid-1");
        assert!(convo.auto_reply);
        assert_eq!(convo.status, ConversationStatus::Open);
        assert_eq!(convo.tenant, "acme");
    }

    #[test]
    fn profile_absorb_only_takes_fresher_fields() {
        let mut profile = CustomerProfile {
            display_name: Some("Jo".into()),
            ..Default::default()
        };
        let incoming = CustomerProfile {
            display_name: Some("Jo Doe".into()),
            email: Some("jo@example.com".into()),
            ..Default::default()
        };
        assert!(profile.absorb(&incoming));
        assert_eq!(profile.display_name.as_deref(), Some("Jo Doe"));
        assert_eq!(profile.email.as_deref(), Some("jo@example.com"));
        // absorbing the same data again is a no-op
        assert!(!profile.absorb(&incoming));
        // an empty update never clears anything
        assert!(!profile.absorb(&CustomerProfile::default()));
        assert_eq!(profile.display_name.as_deref(), Some("Jo Doe"));
    }
}
