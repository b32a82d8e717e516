//! Telegram bot adapter.
//!
//! Telegram authenticates webhooks with the secret token registered at
//! `setWebhook` time (no signed body, no GET handshake), and its updates do
//! not name the receiving bot, so normalized events leave the connection
//! external id empty and rely on resolver-side connection selection.

use async_trait::async_trait;
use http::HeaderMap;
use odm_core::{
    Connection, CustomerProfile, EventKind, InboundEvent, OutboundMessage, Platform, SendReceipt,
};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::constraints::enforce_attachment_limits;
use crate::errors::{ParseError, SendError};
use crate::meta::now_rfc3339;
use crate::signature::verify_header_token;
use crate::traits::{PlatformAdapter, PlatformSecrets};

const API_BASE: &str = "https://api.telegram.org";
const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";
const ALLOWED_ATTACHMENTS: &[&str] = &["jpg", "jpeg", "png", "gif", "pdf"];
const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;
const MAX_TEXT_CHARS: usize = 4096;

pub struct TelegramAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramAdapter {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn classify_status(status: reqwest::StatusCode, raw: &Value, body_text: &str) -> SendError {
        let retry_after_ms = raw
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(|v| v.as_u64())
            .map(|secs| secs * 1_000);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SendError::retryable(
                "telegram_retryable",
                format!("status={} body={}", status.as_u16(), body_text),
                retry_after_ms.or(Some(1_000)),
            )
        } else {
            SendError::permanent(
                "telegram_send_failed",
                format!("status={} body={}", status.as_u16(), body_text),
            )
        }
    }
}

impl Default for TelegramAdapter {
    fn default() -> Self {
        Self::new(API_BASE)
    }
}

#[async_trait]
impl PlatformAdapter for TelegramAdapter {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn verify(&self, secrets: &PlatformSecrets, headers: &HeaderMap, _body: &[u8]) -> bool {
        secrets
            .verify_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .is_some_and(|token| verify_header_token(token, headers, SECRET_HEADER))
    }

    fn parse(&self, tenant: &str, body: &[u8]) -> Result<Vec<InboundEvent>, ParseError> {
        let update: Value = serde_json::from_slice(body)?;
        Ok(event_from_update(tenant, &update).into_iter().collect())
    }

    async fn send(
        &self,
        connection: &Connection,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        let token = connection
            .credential
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SendError::permanent(
                    "telegram_missing_credential",
                    "connection has no bot token",
                )
            })?;

        let (method, payload) = build_payload(message)?;
        if let Some(url) = message.attachment_url.as_deref() {
            enforce_attachment_limits(&self.client, url, ALLOWED_ATTACHMENTS, MAX_ATTACHMENT_BYTES)
                .await?;
        }

        if let Some(scenario) = self.api_base.strip_prefix("mock://") {
            return match scenario {
                "success" => Ok(SendReceipt {
                    platform_message_id: format!("tg.mock.{}", message.correlation_id),
                    raw: payload,
                }),
                "throttle" => Err(SendError::retryable(
                    "telegram_retryable",
                    "mock throttled",
                    Some(1_000),
                )),
                other => Err(SendError::permanent(
                    "telegram_mock",
                    format!("unknown mock scenario `{other}`"),
                )),
            };
        }

        let endpoint = format!("{}/bot{token}/{method}", self.api_base);
        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                SendError::retryable("telegram_http", "failed to call Bot API", Some(1_000))
                    .with_source(err)
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|err| {
            SendError::retryable("telegram_body", "failed to read response body", Some(1_000))
                .with_source(err)
        })?;
        let raw: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

        if !status.is_success() || !raw.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(Self::classify_status(status, &raw, &body_text));
        }

        let message_id = raw
            .get("result")
            .and_then(|r| r.get("message_id"))
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        Ok(SendReceipt {
            platform_message_id: format!("{}:{message_id}", message.recipient_external_id),
            raw,
        })
    }
}

fn build_payload(message: &OutboundMessage) -> Result<(&'static str, Value), SendError> {
    if let Some(url) = message.attachment_url.as_deref() {
        let mut payload = json!({"chat_id": message.recipient_external_id, "photo": url});
        if let Some(text) = message.text.as_deref() {
            payload["caption"] = json!(text);
        }
        return Ok(("sendPhoto", payload));
    }
    let text = message.text.as_deref().unwrap_or_default();
    if text.trim().is_empty() {
        return Err(SendError::permanent(
            "telegram_missing_text",
            "message text cannot be empty",
        ));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(SendError::permanent(
            "telegram_text_too_long",
            format!("message exceeds {MAX_TEXT_CHARS} characters"),
        ));
    }
    Ok((
        "sendMessage",
        json!({"chat_id": message.recipient_external_id, "text": text}),
    ))
}

fn event_from_update(tenant: &str, update: &Value) -> Option<InboundEvent> {
    if let Some(message) = update.get("message") {
        return event_from_message(tenant, message, EventKind::Text);
    }
    if let Some(edited) = update.get("edited_message") {
        return event_from_message(tenant, edited, EventKind::Edit);
    }
    if let Some(cq) = update.get("callback_query") {
        let from = cq.get("from")?;
        if from.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false) {
            return None;
        }
        let chat_id = cq
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_i64())
            .or_else(|| from.get("id").and_then(|v| v.as_i64()))?;
        return Some(InboundEvent {
            tenant: tenant.to_string(),
            platform: Platform::Telegram,
            connection_external_id: String::new(),
            sender_external_id: chat_id.to_string(),
            kind: EventKind::Postback,
            text: cq.get("data").and_then(|v| v.as_str()).map(str::to_string),
            attachment_url: None,
            platform_message_id: cq.get("id").and_then(|v| v.as_str()).map(str::to_string),
            timestamp: now_rfc3339(),
            profile: profile_from(from),
            payload: cq.clone(),
        });
    }
    debug!("ignoring telegram update without message content");
    None
}

fn event_from_message(tenant: &str, message: &Value, base_kind: EventKind) -> Option<InboundEvent> {
    let from = message.get("from")?;
    if from.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false) {
        // our own bot's messages echoed into the update stream
        debug!("dropping bot-authored telegram message");
        return None;
    }
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_i64())?;
    let message_id = message.get("message_id").and_then(|v| v.as_i64())?;

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let has_attachment =
        message.get("photo").is_some() || message.get("document").is_some();
    let kind = match base_kind {
        EventKind::Edit => EventKind::Edit,
        _ if has_attachment => EventKind::Attachment,
        _ if text.is_some() => EventKind::Text,
        _ => EventKind::Other,
    };

    let timestamp = message
        .get("date")
        .and_then(|v| v.as_i64())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(now_rfc3339);

    Some(InboundEvent {
        tenant: tenant.to_string(),
        platform: Platform::Telegram,
        connection_external_id: String::new(),
        sender_external_id: chat_id.to_string(),
        kind,
        text,
        // file_id payloads need a getFile exchange to become URLs; the raw
        // payload keeps them for that follow-up
        attachment_url: None,
        platform_message_id: Some(format!("{chat_id}:{message_id}")),
        timestamp,
        profile: profile_from(from),
        payload: message.clone(),
    })
}

fn profile_from(from: &Value) -> Option<CustomerProfile> {
    let first = from.get("first_name").and_then(|v| v.as_str());
    let last = from.get("last_name").and_then(|v| v.as_str());
    let username = from.get("username").and_then(|v| v.as_str());
    let display_name = match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f.to_string()),
        _ => username.map(str::to_string),
    }?;
    Some(CustomerProfile {
        display_name: Some(display_name),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn verify_checks_secret_header() {
        let adapter = TelegramAdapter::default();
        let secrets = PlatformSecrets {
            verify_token: Some("hook-secret".into()),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        assert!(!adapter.verify(&secrets, &headers, b"{}"));
        headers.insert(SECRET_HEADER, HeaderValue::from_static("hook-secret"));
        assert!(adapter.verify(&secrets, &headers, b"{}"));
        // no configured token fails closed
        assert!(!adapter.verify(&PlatformSecrets::default(), &headers, b"{}"));
    }

    #[test]
    fn parse_maps_text_and_profile() {
        let body = serde_json::to_vec(&json!({
            "update_id": 10,
            "message": {
                "message_id": 55,
                "from": {"id": 777, "is_bot": false, "first_name": "Ada", "last_name": "L"},
                "chat": {"id": 777, "type": "private"},
                "date": 1700000000,
                "text": "hello bot"
            }
        }))
        .unwrap();
        let events = TelegramAdapter::default().parse("acme", &body).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::Text);
        assert_eq!(event.sender_external_id, "777");
        assert_eq!(event.platform_message_id.as_deref(), Some("777:55"));
        assert!(event.connection_external_id.is_empty());
        assert_eq!(
            event.profile.as_ref().unwrap().display_name.as_deref(),
            Some("Ada L")
        );
    }

    #[test]
    fn parse_drops_bot_authored_messages() {
        let body = serde_json::to_vec(&json!({
            "update_id": 11,
            "message": {
                "message_id": 56,
                "from": {"id": 1, "is_bot": true, "first_name": "OurBot"},
                "chat": {"id": 777, "type": "private"},
                "date": 1700000000,
                "text": "automated reply"
            }
        }))
        .unwrap();
        assert!(
            TelegramAdapter::default()
                .parse("acme", &body)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn parse_maps_edits_and_callbacks() {
        let edited = serde_json::to_vec(&json!({
            "update_id": 12,
            "edited_message": {
                "message_id": 55,
                "from": {"id": 777, "is_bot": false, "first_name": "Ada"},
                "chat": {"id": 777, "type": "private"},
                "date": 1700000100,
                "text": "hello bot (edited)"
            }
        }))
        .unwrap();
        let events = TelegramAdapter::default().parse("acme", &edited).unwrap();
        assert_eq!(events[0].kind, EventKind::Edit);
        assert_eq!(events[0].platform_message_id.as_deref(), Some("777:55"));

        let callback = serde_json::to_vec(&json!({
            "update_id": 13,
            "callback_query": {
                "id": "cb-9",
                "from": {"id": 777, "is_bot": false, "first_name": "Ada"},
                "data": "ORDER_STATUS",
                "message": {"message_id": 60, "chat": {"id": 777}}
            }
        }))
        .unwrap();
        let events = TelegramAdapter::default().parse("acme", &callback).unwrap();
        assert_eq!(events[0].kind, EventKind::Postback);
        assert_eq!(events[0].text.as_deref(), Some("ORDER_STATUS"));
    }

    #[tokio::test]
    async fn send_rejects_over_length_text() {
        let mut connection = Connection::new("acme", Platform::Telegram, "bot-1", "Acme Bot");
        connection.credential = Some("123:abc".into());
        let out = OutboundMessage {
            conversation_id: uuid::Uuid::new_v4(),
            recipient_external_id: "777".into(),
            text: Some("x".repeat(MAX_TEXT_CHARS + 1)),
            attachment_url: None,
            correlation_id: "c1".into(),
        };
        let err = TelegramAdapter::new("mock://success")
            .send(&connection, &out)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "telegram_text_too_long");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn send_mock_success() {
        let mut connection = Connection::new("acme", Platform::Telegram, "bot-1", "Acme Bot");
        connection.credential = Some("123:abc".into());
        let out = OutboundMessage {
            conversation_id: uuid::Uuid::new_v4(),
            recipient_external_id: "777".into(),
            text: Some("pong".into()),
            attachment_url: None,
            correlation_id: "c2".into(),
        };
        let receipt = TelegramAdapter::new("mock://success")
            .send(&connection, &out)
            .await
            .unwrap();
        assert_eq!(receipt.platform_message_id, "tg.mock.c2");
    }
}
