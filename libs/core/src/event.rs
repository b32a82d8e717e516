use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{CustomerProfile, Platform};

/// Classification of a normalized webhook event.
///
/// Only `Text`, `Attachment`, and `Postback` ever become persisted
/// messages; the remaining kinds are callbacks correlated against an
/// existing message row, and `Echo` is dropped before it reaches the
/// processor at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Attachment,
    Postback,
    Echo,
    Delivery,
    Read,
    Reaction,
    Edit,
    Other,
}

/// Normalized inbound event produced by a platform adapter.
///
/// Transient by design: it travels from the webhook handler through the
/// durable queue (serialized) or straight into the processor, and is never
/// stored.
///
/// ```
/// use odm_core::{EventKind, InboundEvent, Platform};
///
/// let event = InboundEvent {
///     tenant: "acme".into(),
///     platform: Platform::Messenger,
///     connection_external_id: "page-111".into(),
///     sender_external_id: "psid-abc".into(),
///     kind: EventKind::Text,
///     text: Some("Hi".into()),
///     attachment_url: None,
///     platform_message_id: Some("mid.1".into()),
///     timestamp: "2025-01-01T00:00:00Z".into(),
///     profile: None,
///     payload: serde_json::Value::Null,
/// };
/// assert_eq!(event.kind, EventKind::Text);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEvent {
    pub tenant: String,
    pub platform: Platform,
    /// External account id the platform reported for the receiving side
    /// (page id, business account id). Empty when the platform's webhook
    /// payload does not carry one.
    pub connection_external_id: String,
    pub sender_external_id: String,
    pub kind: EventKind,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    /// Platform-native message id; idempotency and callback correlation key.
    pub platform_message_id: Option<String>,
    /// RFC3339 timestamp reported by the platform.
    pub timestamp: String,
    /// Best-effort customer profile data carried by the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<CustomerProfile>,
    /// Raw platform fragment this event was normalized from.
    #[serde(default)]
    pub payload: Value,
}

impl InboundEvent {
    /// Whether this kind creates a persisted customer message.
    pub fn creates_message(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Text | EventKind::Attachment | EventKind::Postback
        )
    }
}

/// Outbound payload handed to a platform adapter's send path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: Uuid,
    pub recipient_external_id: String,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    /// Caller-generated id for log correlation across the send round trip.
    pub correlation_id: String,
}

/// What a platform acknowledged for a delivered outbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendReceipt {
    pub platform_message_id: String,
    #[serde(default)]
    pub raw: Value,
}
