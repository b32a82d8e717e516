//! Embeddable web widget adapter.
//!
//! The widget posts one message per call, signed with a base64 HMAC of the
//! body. Outbound delivery rides the realtime channel the widget is already
//! subscribed to, so `send` acknowledges without an external HTTP call.

use async_trait::async_trait;
use http::HeaderMap;
use nanoid::nanoid;
use odm_core::{
    Connection, CustomerProfile, EventKind, InboundEvent, OutboundMessage, Platform, SendReceipt,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{ParseError, SendError};
use crate::meta::now_rfc3339;
use crate::signature::verify_base64_hmac;
use crate::traits::{PlatformAdapter, PlatformSecrets};

const SIGNATURE_HEADER: &str = "X-Widget-Signature";

#[derive(Default)]
pub struct WebChatAdapter;

impl WebChatAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct WidgetMessage {
    widget_id: String,
    visitor_id: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attachment_url: Option<String>,
    #[serde(default)]
    profile: Option<CustomerProfile>,
    #[serde(default)]
    sent_at: Option<String>,
}

#[async_trait]
impl PlatformAdapter for WebChatAdapter {
    fn platform(&self) -> Platform {
        Platform::WebChat
    }

    fn verify(&self, secrets: &PlatformSecrets, headers: &HeaderMap, body: &[u8]) -> bool {
        secrets
            .app_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .is_some_and(|secret| verify_base64_hmac(secret, headers, SIGNATURE_HEADER, body))
    }

    fn parse(&self, tenant: &str, body: &[u8]) -> Result<Vec<InboundEvent>, ParseError> {
        let msg: WidgetMessage = serde_json::from_slice(body)?;
        if msg.text.is_none() && msg.attachment_url.is_none() {
            return Err(ParseError::Unsupported(
                "widget message carries neither text nor attachment".into(),
            ));
        }
        let kind = if msg.attachment_url.is_some() {
            EventKind::Attachment
        } else {
            EventKind::Text
        };
        let payload: Value = serde_json::from_slice(body)?;
        Ok(vec![InboundEvent {
            tenant: tenant.to_string(),
            platform: Platform::WebChat,
            connection_external_id: msg.widget_id,
            sender_external_id: msg.visitor_id,
            kind,
            text: msg.text,
            attachment_url: msg.attachment_url,
            platform_message_id: msg.message_id,
            timestamp: msg.sent_at.unwrap_or_else(now_rfc3339),
            profile: msg.profile,
            payload,
        }])
    }

    async fn send(
        &self,
        _connection: &Connection,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        if message.text.as_deref().unwrap_or_default().trim().is_empty()
            && message.attachment_url.is_none()
        {
            return Err(SendError::permanent(
                "webchat_missing_content",
                "message needs text or an attachment",
            ));
        }
        // The widget receives the message over its realtime subscription;
        // the receipt id lets callbacks correlate anyway.
        Ok(SendReceipt {
            platform_message_id: format!("wc-{}", nanoid!(12)),
            raw: json!({"delivered_via": "realtime"}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
    use hmac::{Hmac, Mac};
    use http::HeaderValue;
    use sha2::Sha256;

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = B64.encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn verify_fails_closed_without_secret() {
        let adapter = WebChatAdapter::new();
        let body = br#"{"widget_id":"w1","visitor_id":"v1","text":"hi"}"#;
        let headers = signed_headers("widget-secret", body);
        assert!(!adapter.verify(&PlatformSecrets::default(), &headers, body));
        let secrets = PlatformSecrets {
            app_secret: Some("widget-secret".into()),
            ..Default::default()
        };
        assert!(adapter.verify(&secrets, &headers, body));
    }

    #[test]
    fn parse_builds_one_event_with_profile() {
        let body = serde_json::to_vec(&json!({
            "widget_id": "w1",
            "visitor_id": "v-42",
            "message_id": "wm-1",
            "text": "I need help",
            "profile": {"display_name": "Sam", "email": "sam@example.com"},
            "sent_at": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        let events = WebChatAdapter::new().parse("acme", &body).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::Text);
        assert_eq!(event.connection_external_id, "w1");
        assert_eq!(event.sender_external_id, "v-42");
        assert_eq!(event.platform_message_id.as_deref(), Some("wm-1"));
        assert_eq!(event.timestamp, "2025-03-01T10:00:00Z");
        let profile = event.profile.as_ref().unwrap();
        assert_eq!(profile.email.as_deref(), Some("sam@example.com"));
    }

    #[test]
    fn parse_rejects_empty_message() {
        let body = serde_json::to_vec(&json!({"widget_id": "w1", "visitor_id": "v1"})).unwrap();
        assert!(matches!(
            WebChatAdapter::new().parse("acme", &body),
            Err(ParseError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn send_returns_receipt_without_transport() {
        let connection = Connection::new("acme", Platform::WebChat, "w1", "Site Widget");
        let out = OutboundMessage {
            conversation_id: uuid::Uuid::new_v4(),
            recipient_external_id: "v-42".into(),
            text: Some("an agent will be right with you".into()),
            attachment_url: None,
            correlation_id: "c1".into(),
        };
        let receipt = WebChatAdapter::new().send(&connection, &out).await.unwrap();
        assert!(receipt.platform_message_id.starts_with("wc-"));
    }
}
